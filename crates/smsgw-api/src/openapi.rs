//! OpenAPI documentation
//!
//! Serves a hand-maintained OpenAPI 3.0 document and a Swagger UI page.

use axum::{
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

/// Create OpenAPI routes
pub fn create_openapi_routes() -> Router {
    Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
}

async fn openapi_json() -> impl IntoResponse {
    Json(get_openapi_spec())
}

async fn swagger_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

fn json_body(schema: &str) -> Value {
    json!({
        "required": true,
        "content": {
            "application/json": {"schema": {"$ref": format!("#/components/schemas/{}", schema)}}
        }
    })
}

fn ok_response(description: &str, schema: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {"schema": {"$ref": format!("#/components/schemas/{}", schema)}}
        }
    })
}

fn error_responses() -> Value {
    let error = json!({
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorBody"}}}
    });
    let with = |description: &str| {
        let mut e = error.clone();
        e["description"] = json!(description);
        e
    };
    json!({
        "400": with("Invalid request or field errors"),
        "401": with("Missing or invalid credentials"),
        "403": with("Missing permission"),
        "500": with("Store, queue or configuration failure")
    })
}

fn operation(tag: &str, summary: &str, id: &str, ok: Value, body: Option<Value>) -> Value {
    let mut responses = error_responses();
    responses["200"] = ok;
    let mut op = json!({
        "tags": [tag],
        "summary": summary,
        "operationId": id,
        "responses": responses
    });
    if let Some(body) = body {
        op["requestBody"] = body;
    }
    op
}

fn campaign_query() -> Value {
    json!([{"name": "CampaignID", "in": "query", "required": true, "schema": {"type": "integer"}}])
}

/// OpenAPI document as JSON
pub fn get_openapi_spec() -> Value {
    let mut progress = operation(
        "campaigns",
        "Per-status counts of a campaign",
        "campaignProgress",
        ok_response("Progress", "Progress"),
        None,
    );
    progress["parameters"] = campaign_query();
    let mut report = operation(
        "campaigns",
        "Throughput report of a campaign",
        "campaignReport",
        ok_response("Report", "Report"),
        None,
    );
    report["parameters"] = campaign_query();

    let mut filter = operation(
        "messages",
        "List messages; Stats adds counts, Format returns an attachment",
        "filterMessages",
        ok_response("Messages", "MessageList"),
        None,
    );
    filter["parameters"] = json!([
        {"name": "Status", "in": "query", "schema": {"type": "string"}},
        {"name": "Username", "in": "query", "schema": {"type": "string"}},
        {"name": "CampaignID", "in": "query", "schema": {"type": "integer"}},
        {"name": "OrderByKey", "in": "query", "schema": {"type": "string", "default": "QueuedAt"}},
        {"name": "OrderByDir", "in": "query", "schema": {"type": "string", "enum": ["ASC", "DESC"]}},
        {"name": "From", "in": "query", "schema": {"type": "string"}},
        {"name": "PerPage", "in": "query", "schema": {"type": "integer", "default": 100}},
        {"name": "Stats", "in": "query", "schema": {"type": "boolean"}},
        {"name": "Format", "in": "query", "schema": {"type": "string", "enum": ["csv", "xlsx"]}}
    ]);

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "smsgw API",
            "description": "SMS dispatch over SMPP\n\n## Authentication\n\nObtain a token from `POST /auth`, then send it as `Authorization: Bearer <token>` or `X-Token: <token>`. HTTP Basic credentials are accepted too.",
            "version": "1.0.0"
        },
        "tags": [
            {"name": "health", "description": "Health check endpoints"},
            {"name": "auth", "description": "Token issue"},
            {"name": "messages", "description": "Single messages"},
            {"name": "campaigns", "description": "Bulk campaigns"},
            {"name": "files", "description": "Destination number files"}
        ],
        "paths": {
            "/health": {
                "get": {
                    "tags": ["health"],
                    "summary": "Basic health check",
                    "operationId": "health",
                    "responses": {"200": ok_response("Service is healthy", "HealthResponse")}
                }
            },
            "/health/live": {
                "get": {
                    "tags": ["health"],
                    "summary": "Liveness probe",
                    "operationId": "liveness",
                    "responses": {"200": {"description": "Service is alive"}}
                }
            },
            "/health/ready": {
                "get": {
                    "tags": ["health"],
                    "summary": "Readiness probe",
                    "operationId": "readiness",
                    "responses": {
                        "200": {"description": "Service is ready"},
                        "503": {"description": "Database unreachable"}
                    }
                }
            },
            "/auth": {
                "post": operation("auth", "Exchange credentials for a token", "login",
                    ok_response("Token", "LoginResponse"), Some(json_body("LoginRequest")))
            },
            "/message": {
                "post": operation("messages", "Send one message", "sendMessage",
                    ok_response("Message accepted", "Created"), Some(json_body("NewMessage")))
            },
            "/message/filter": {"get": filter},
            "/campaign": {
                "post": operation("campaigns", "Start a campaign", "startCampaign",
                    ok_response("Campaign started", "Created"), Some(json_body("NewCampaign")))
            },
            "/campaign/stop": {
                "post": operation("campaigns", "Stop pending messages of a campaign", "stopCampaign",
                    ok_response("Messages stopped", "Affected"), Some(json_body("CampaignRef")))
            },
            "/campaign/retry": {
                "post": operation("campaigns", "Requeue failed messages of a campaign", "retryCampaign",
                    ok_response("Messages requeued", "Affected"), Some(json_body("CampaignRef")))
            },
            "/campaign/retry/queued": {
                "post": operation("campaigns", "Republish messages still queued", "retryQueued",
                    ok_response("Messages republished", "Affected"), Some(json_body("CampaignRef")))
            },
            "/campaign/progress": {"get": progress},
            "/campaign/report": {"get": report},
            "/campaign/filter": {
                "get": operation("campaigns", "List campaigns", "filterCampaigns",
                    json!({"description": "Campaigns"}), None)
            },
            "/file/upload": {
                "post": operation("files", "Upload a .csv, .txt or .xlsx destination file", "uploadFile",
                    json!({"description": "Stored file"}),
                    Some(json!({
                        "required": true,
                        "content": {
                            "multipart/form-data": {
                                "schema": {
                                    "type": "object",
                                    "required": ["File"],
                                    "properties": {
                                        "File": {"type": "string", "format": "binary"},
                                        "Description": {"type": "string"}
                                    }
                                }
                            }
                        }
                    })))
            },
            "/file/filter": {
                "get": operation("files", "List destination files", "filterFiles",
                    json!({"description": "Files"}), None)
            },
            "/file/delete": {
                "post": operation("files", "Mark a destination file deleted", "deleteFile",
                    json!({"description": "File deleted"}), Some(json!({
                        "required": true,
                        "content": {"application/json": {"schema": {
                            "type": "object", "required": ["ID"], "properties": {"ID": {"type": "integer"}}
                        }}}
                    })))
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": {"type": "http", "scheme": "bearer"},
                "tokenHeader": {"type": "apiKey", "in": "header", "name": "X-Token"},
                "basicAuth": {"type": "http", "scheme": "basic"}
            },
            "schemas": {
                "HealthResponse": {
                    "type": "object",
                    "properties": {"status": {"type": "string", "example": "healthy"}}
                },
                "ErrorBody": {
                    "type": "object",
                    "properties": {
                        "Ok": {"type": "boolean", "example": false},
                        "Errors": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "Type": {"type": "string", "enum": ["request", "form", "auth", "forbidden", "notfound", "db", "queue", "config", "smpp", "internal"]},
                                    "Field": {"type": "string"},
                                    "Message": {"type": "string"}
                                }
                            }
                        }
                    }
                },
                "LoginRequest": {
                    "type": "object",
                    "required": ["Username", "Password"],
                    "properties": {
                        "Username": {"type": "string"},
                        "Password": {"type": "string", "format": "password"}
                    }
                },
                "LoginResponse": {
                    "type": "object",
                    "properties": {"Ok": {"type": "boolean"}, "Response": {"type": "object", "properties": {"Token": {"type": "string"}}}}
                },
                "Created": {
                    "type": "object",
                    "properties": {"Ok": {"type": "boolean"}, "Response": {"type": "object", "properties": {"ID": {"type": "integer"}}}}
                },
                "Affected": {
                    "type": "object",
                    "properties": {"Ok": {"type": "boolean"}, "Response": {"type": "object", "properties": {"Count": {"type": "integer"}}}}
                },
                "CampaignRef": {
                    "type": "object",
                    "required": ["CampaignID"],
                    "properties": {"CampaignID": {"type": "integer"}}
                },
                "NewMessage": {
                    "type": "object",
                    "required": ["Dst", "Src", "Msg"],
                    "properties": {
                        "Dst": {"type": "string", "example": "923001234567"},
                        "Src": {"type": "string"},
                        "Msg": {"type": "string", "description": "Text; [[x]] is masked when Mask is set"},
                        "Priority": {"type": "integer", "minimum": 0, "maximum": 10},
                        "ScheduledAt": {"type": "integer", "description": "Unix seconds, 0 sends now"},
                        "SendBefore": {"type": "string", "example": "21:00"},
                        "SendAfter": {"type": "string", "example": "09:00"},
                        "IsFlash": {"type": "boolean"},
                        "Mask": {"type": "boolean"}
                    }
                },
                "NewCampaign": {
                    "type": "object",
                    "required": ["Description", "Src", "Msg"],
                    "properties": {
                        "Description": {"type": "string"},
                        "Src": {"type": "string"},
                        "Msg": {"type": "string", "description": "Text; {{Name}} takes the row's Name column"},
                        "Priority": {"type": "integer"},
                        "FileID": {"type": "integer"},
                        "Numbers": {"type": "string", "description": "Comma separated, used without FileID"},
                        "ScheduledAt": {"type": "integer"},
                        "SendBefore": {"type": "string"},
                        "SendAfter": {"type": "string"},
                        "IsFlash": {"type": "boolean"},
                        "Mask": {"type": "boolean"}
                    }
                },
                "MessageList": {
                    "type": "object",
                    "properties": {
                        "Ok": {"type": "boolean"},
                        "Response": {
                            "type": "object",
                            "properties": {
                                "Messages": {"type": "array", "items": {"type": "object"}},
                                "Stats": {"$ref": "#/components/schemas/Stats"}
                            }
                        }
                    }
                },
                "Stats": {
                    "type": "object",
                    "properties": {
                        "Queued": {"type": "integer"},
                        "Sent": {"type": "integer"},
                        "Error": {"type": "integer"},
                        "Delivered": {"type": "integer"},
                        "NotDelivered": {"type": "integer"},
                        "Scheduled": {"type": "integer"},
                        "Stopped": {"type": "integer"},
                        "Total": {"type": "integer"}
                    }
                },
                "Progress": {
                    "type": "object",
                    "properties": {
                        "Total": {"type": "integer"},
                        "Queued": {"type": "integer"},
                        "Delivered": {"type": "integer"},
                        "NotDelivered": {"type": "integer"},
                        "Sent": {"type": "integer"},
                        "Error": {"type": "integer"},
                        "Scheduled": {"type": "integer"},
                        "Stopped": {"type": "integer"},
                        "Pending": {"type": "integer"}
                    }
                },
                "Report": {
                    "type": "object",
                    "properties": {
                        "ID": {"type": "integer"},
                        "Total": {"type": "integer"},
                        "MsgSize": {"type": "integer"},
                        "TotalMsgs": {"type": "integer"},
                        "FirstQueued": {"type": "integer"},
                        "LastSent": {"type": "integer"},
                        "TotalTime": {"type": "integer"},
                        "Throughput": {"type": "string", "example": "12.50"},
                        "PerConnection": {"type": "string", "example": "6.25"},
                        "Connections": {"type": "array", "items": {"type": "object"}}
                    }
                }
            }
        },
        "security": [{"bearerAuth": []}, {"tokenHeader": []}, {"basicAuth": []}]
    })
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>smsgw API</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui.css" />
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({ url: "/openapi.json", dom_id: '#swagger-ui' });
        };
    </script>
</body>
</html>"#;
