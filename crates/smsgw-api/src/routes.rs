//! API routes

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{auth, campaigns, files, health, messages, metrics};
use crate::openapi::create_openapi_routes;

/// Room for multipart boundaries and the description field
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.ctx.config.http.max_upload_bytes + MULTIPART_OVERHEAD;

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    let message_routes = Router::new()
        .route("/", post(messages::send_message))
        .route("/filter", get(messages::filter_messages));

    let campaign_routes = Router::new()
        .route("/", post(campaigns::start_campaign))
        .route("/stop", post(campaigns::stop_campaign))
        .route("/retry", post(campaigns::retry_campaign))
        .route("/retry/queued", post(campaigns::retry_queued))
        .route("/progress", get(campaigns::progress))
        .route("/report", get(campaigns::report))
        .route("/filter", get(campaigns::filter_campaigns));

    let file_routes = Router::new()
        .route(
            "/upload",
            post(files::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/filter", get(files::filter_files))
        .route("/delete", post(files::delete_file));

    // Everything below requires a token or basic credentials
    let protected = Router::new()
        .nest("/message", message_routes)
        .nest("/campaign", campaign_routes)
        .nest("/file", file_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/auth", post(auth::token))
        .route("/metrics", get(metrics::metrics))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .merge(protected)
        .merge(public)
        .merge(create_openapi_routes())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use axum::http::{header, HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use axum::body::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use smsgw_common::types::Permission;
    use smsgw_common::Config;
    use smsgw_core::Context;
    use smsgw_storage::NewUser;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
        [database]
        url = "postgres://localhost/smsgw"

        [[conn_groups]]
        name = "Default"
        default_pfx = "92"

        [[conn_groups.conns]]
        id = "c1"
        url = "127.0.0.1:2775"
        user = "u"
        passwd = "p"
        size = 10
        time = 1
        pfxs = ["92300"]
    "#;

    const BOUNDARY: &str = "smsgw-boundary";

    struct App {
        server: TestServer,
        ctx: Context,
        _dir: TempDir,
    }

    async fn app() -> App {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(Config::from_toml(CONFIG).unwrap());
        let ctx = Context::memory(config, dir.path()).unwrap();
        let router = create_router(AppState::new(ctx.clone(), None));
        App {
            server: TestServer::new(router).unwrap(),
            ctx,
            _dir: dir,
        }
    }

    impl App {
        async fn add_user(&self, username: &str, permissions: Vec<Permission>) {
            self.ctx
                .users
                .create(NewUser {
                    username: username.to_string(),
                    password: hash_password("secret").unwrap(),
                    name: username.to_string(),
                    email: format!("{}@example.com", username),
                    connection_group: "Default".to_string(),
                    permissions,
                })
                .await
                .unwrap();
        }

        async fn login(&self, username: &str) -> String {
            let response = self
                .server
                .post("/auth")
                .json(&json!({"Username": username, "Password": "secret"}))
                .await;
            response.assert_status_ok();
            let body = response.json::<Value>();
            body["Response"]["Token"].as_str().unwrap().to_string()
        }
    }

    fn bearer(token: &str) -> (HeaderName, HeaderValue) {
        (
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        )
    }

    fn message() -> Value {
        json!({"Dst": "923001234567", "Src": "DEMO", "Msg": "Hello"})
    }

    fn multipart(name: &str, content: &str) -> Bytes {
        Bytes::from(format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"Description\"\r\n\r\nLeads\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"File\"; filename=\"{name}\"\r\n\
             Content-Type: text/plain\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
            name = name,
            content = content,
        ))
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app().await;
        let response = app.server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({"status": "healthy"}));
        app.server.get("/health/ready").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let app = app().await;
        let response = app.server.post("/message").json(&message()).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body = response.json::<Value>();
        assert_eq!(body["Ok"], json!(false));
        assert_eq!(body["Errors"][0]["Type"], json!("auth"));
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let app = app().await;
        app.add_user("alice", vec![]).await;
        let response = app
            .server
            .post("/auth")
            .json(&json!({"Username": "alice", "Password": "wrong"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_send_and_filter_with_stats() {
        let app = app().await;
        app.add_user("alice", vec![Permission::SendMessage]).await;
        let token = app.login("alice").await;
        let (name, value) = bearer(&token);

        let response = app
            .server
            .post("/message")
            .add_header(name.clone(), value.clone())
            .json(&message())
            .await;
        response.assert_status_ok();
        let id = response.json::<Value>()["Response"]["ID"].as_i64().unwrap();
        assert!(id > 0);

        let response = app
            .server
            .get("/message/filter")
            .add_query_param("Stats", "true")
            .add_header(name, value)
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        let messages = body["Response"]["Messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["ID"], json!(id));
        assert_eq!(messages[0]["Status"], json!("Queued"));
        assert_eq!(body["Response"]["Stats"]["Queued"], json!(1));
        assert_eq!(body["Response"]["Stats"]["Total"], json!(1));

        let metrics = app.server.get("/metrics").await.text();
        assert!(metrics.contains("smsgw_messages_accepted_total"));
    }

    #[tokio::test]
    async fn test_x_token_and_basic_credentials() {
        let app = app().await;
        app.add_user("alice", vec![Permission::SendMessage]).await;
        let token = app.login("alice").await;

        app.server
            .post("/message")
            .add_header(
                HeaderName::from_static("x-token"),
                HeaderValue::from_str(&token).unwrap(),
            )
            .json(&message())
            .await
            .assert_status_ok();

        let basic = format!("Basic {}", STANDARD.encode("alice:secret"));
        app.server
            .post("/message")
            .add_header(header::AUTHORIZATION, HeaderValue::from_str(&basic).unwrap())
            .json(&message())
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_suspended_user_is_rejected() {
        let app = app().await;
        app.add_user("alice", vec![Permission::SendMessage]).await;
        let token = app.login("alice").await;
        app.ctx.users.set_suspended("alice", true).await.unwrap();

        let (name, value) = bearer(&token);
        let response = app
            .server
            .post("/message")
            .add_header(name, value)
            .json(&message())
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_field_errors_are_collected() {
        let app = app().await;
        app.add_user("alice", vec![Permission::SendMessage]).await;
        let (name, value) = bearer(&app.login("alice").await);

        let response = app
            .server
            .post("/message")
            .add_header(name, value)
            .json(&json!({"Dst": "92", "Msg": ""}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body = response.json::<Value>();
        let fields: Vec<&str> = body["Errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["Field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"Dst"));
        assert!(fields.contains(&"Src"));
        assert!(fields.contains(&"Msg"));
    }

    #[tokio::test]
    async fn test_missing_permission_is_forbidden() {
        let app = app().await;
        app.add_user("bob", vec![]).await;
        let (name, value) = bearer(&app.login("bob").await);

        let response = app
            .server
            .post("/message")
            .add_header(name, value)
            .json(&message())
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["Errors"][0]["Type"], json!("forbidden"));
    }

    #[tokio::test]
    async fn test_filter_as_csv_attachment() {
        let app = app().await;
        app.add_user("alice", vec![Permission::SendMessage]).await;
        let (name, value) = bearer(&app.login("alice").await);
        app.server
            .post("/message")
            .add_header(name.clone(), value.clone())
            .json(&message())
            .await
            .assert_status_ok();

        let response = app
            .server
            .get("/message/filter")
            .add_query_param("Format", "csv")
            .add_header(name, value)
            .await;
        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "text/csv");
        assert_eq!(
            response.header(header::CONTENT_DISPOSITION),
            "attachment; filename=\"messages.csv\""
        );
        let text = response.text();
        assert!(text.starts_with("Id,Connection,ConnectionGroup,Status"));
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_campaign_start_progress_and_stop() {
        let app = app().await;
        app.add_user(
            "alice",
            vec![Permission::StartCampaign, Permission::StopCampaign],
        )
        .await;
        let (name, value) = bearer(&app.login("alice").await);

        let response = app
            .server
            .post("/campaign")
            .add_header(name.clone(), value.clone())
            .json(&json!({
                "Description": "Launch",
                "Src": "DEMO",
                "Msg": "Hello",
                "Numbers": "923001234567,923001234568,923001234569",
                "ScheduledAt": smsgw_common::types::now_epoch() + 3600
            }))
            .await;
        response.assert_status_ok();
        let id = response.json::<Value>()["Response"]["ID"].as_i64().unwrap();

        let response = app
            .server
            .get("/campaign/progress")
            .add_query_param("CampaignID", id)
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status_ok();
        let progress = response.json::<Value>()["Response"].clone();
        assert_eq!(progress["Total"], json!(3));
        assert_eq!(progress["Scheduled"], json!(3));

        let response = app
            .server
            .post("/campaign/stop")
            .add_header(name, value)
            .json(&json!({"CampaignID": id}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["Response"]["Count"], json!(3));
    }

    #[tokio::test]
    async fn test_file_upload_list_and_delete() {
        let app = app().await;
        app.add_user(
            "alice",
            vec![Permission::StartCampaign, Permission::DeleteNumFile],
        )
        .await;
        let (name, value) = bearer(&app.login("alice").await);
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);

        let response = app
            .server
            .post("/file/upload")
            .add_header(name.clone(), value.clone())
            .content_type(&content_type)
            .bytes(multipart("numbers.csv", "923001234567,923001234568"))
            .await;
        response.assert_status_ok();
        let file = response.json::<Value>()["Response"].clone();
        assert_eq!(file["Name"], json!("numbers.csv"));
        assert_eq!(file["Description"], json!("Leads"));
        assert_eq!(file["Type"], json!(".csv"));
        let file_id = file["ID"].as_i64().unwrap();

        let response = app
            .server
            .post("/campaign")
            .add_header(name.clone(), value.clone())
            .json(&json!({"Description": "From file", "Src": "DEMO", "Msg": "Hi", "FileID": file_id}))
            .await;
        response.assert_status_ok();

        let listed = app
            .server
            .get("/file/filter")
            .add_header(name.clone(), value.clone())
            .await
            .json::<Value>();
        assert_eq!(listed["Response"].as_array().unwrap().len(), 1);

        app.server
            .post("/file/delete")
            .add_header(name.clone(), value.clone())
            .json(&json!({"ID": file_id}))
            .await
            .assert_status_ok();

        let listed = app
            .server
            .get("/file/filter")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(listed["Response"], json!([]));
    }

    #[tokio::test]
    async fn test_upload_rejects_unknown_extension() {
        let app = app().await;
        app.add_user("alice", vec![]).await;
        let (name, value) = bearer(&app.login("alice").await);

        let response = app
            .server
            .post("/file/upload")
            .add_header(name, value)
            .content_type(&format!("multipart/form-data; boundary={}", BOUNDARY))
            .bytes(multipart("numbers.pdf", "923001234567"))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_paths() {
        let app = app().await;
        let doc = app.server.get("/openapi.json").await.json::<Value>();
        assert_eq!(doc["openapi"], json!("3.0.3"));
        assert!(doc["paths"]["/campaign/report"]["get"].is_object());
        assert!(doc["paths"]["/file/upload"]["post"].is_object());
    }
}
