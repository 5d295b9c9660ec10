//! Message listings as CSV or XLSX attachments.

use chrono::{DateTime, SecondsFormat};
use rust_xlsxwriter::{Format, Workbook};
use smsgw_common::types::Epoch;
use smsgw_common::{Error, Result};
use smsgw_storage::Message;
use std::str::FromStr;

pub const COLUMNS: [&str; 20] = [
    "Id",
    "Connection",
    "ConnectionGroup",
    "Status",
    "Error",
    "RespId",
    "Total",
    "Username",
    "Msg",
    "Enc",
    "Dst",
    "Src",
    "CampaignId",
    "Priority",
    "QueuedAt",
    "SentAt",
    "DeliveredAt",
    "ScheduledAt",
    "SendBefore",
    "SendAfter",
];

/// Attachment formats for a message listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "messages.csv",
            ExportFormat::Xlsx => "messages.xlsx",
        }
    }

    pub fn render(&self, messages: &[Message]) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Csv => Ok(to_csv(messages)),
            ExportFormat::Xlsx => to_xlsx(messages),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(Error::field(
                "Format",
                format!("Unsupported format {}, expected csv or xlsx", other),
            )),
        }
    }
}

/// RFC 3339 UTC; unset times render empty
fn time(t: Epoch) -> String {
    if t <= 0 {
        return String::new();
    }
    DateTime::from_timestamp(t, 0)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn record(m: &Message) -> [String; 20] {
    [
        m.id.to_string(),
        m.connection.clone(),
        m.connection_group.clone(),
        m.status.to_string(),
        m.error.clone(),
        m.resp_id.clone(),
        m.total.to_string(),
        m.username.clone(),
        m.msg.clone(),
        m.enc.as_str().to_string(),
        m.dst.clone(),
        m.src.clone(),
        m.campaign_id.to_string(),
        m.priority.to_string(),
        time(m.queued_at),
        time(m.sent_at),
        time(m.delivered_at),
        time(m.scheduled_at),
        m.send_before.clone(),
        m.send_after.clone(),
    ]
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

pub fn to_csv(messages: &[Message]) -> Vec<u8> {
    let mut out = csv_line(&COLUMNS);
    for m in messages {
        out.push_str(&csv_line(&record(m)));
    }
    out.into_bytes()
}

fn xlsx_err(e: rust_xlsxwriter::XlsxError) -> Error {
    Error::Internal(format!("xlsx export: {}", e))
}

pub fn to_xlsx(messages: &[Message]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Messages").map_err(xlsx_err)?;
    for (col, name) in COLUMNS.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *name, &bold)
            .map_err(xlsx_err)?;
    }
    for (i, m) in messages.iter().enumerate() {
        let row = i as u32 + 1;
        for (col, value) in record(m).iter().enumerate() {
            sheet.write_string(row, col as u16, value).map_err(xlsx_err)?;
        }
    }
    workbook.save_to_buffer().map_err(xlsx_err)
}
