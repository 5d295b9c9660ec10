//! Campaign progress and throughput report.

use serde::Serialize;
use smsgw_common::types::{CampaignId, Epoch};
use smsgw_storage::{CampaignReportStats, ConnectionCount, MessageStats};

/// Per-status counts of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Progress {
    pub total: i64,
    pub queued: i64,
    pub delivered: i64,
    pub not_delivered: i64,
    pub sent: i64,
    pub error: i64,
    pub scheduled: i64,
    pub stopped: i64,
    /// Recipients without a message row yet
    pub pending: i64,
}

impl Progress {
    /// `total` is the recipient count recorded on the campaign
    pub fn new(total: i64, stats: &MessageStats) -> Self {
        let counted = stats.queued
            + stats.delivered
            + stats.not_delivered
            + stats.sent
            + stats.error
            + stats.scheduled
            + stats.stopped;
        Self {
            total,
            queued: stats.queued,
            delivered: stats.delivered,
            not_delivered: stats.not_delivered,
            sent: stats.sent,
            error: stats.error,
            scheduled: stats.scheduled,
            stopped: stats.stopped,
            pending: total - counted,
        }
    }
}

/// Throughput summary of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Report {
    #[serde(rename = "ID")]
    pub id: CampaignId,
    /// Messages in the campaign
    pub total: i64,
    /// Segments per message
    pub msg_size: i64,
    /// Segments across the campaign
    pub total_msgs: i64,
    pub first_queued: Epoch,
    pub last_sent: Epoch,
    /// Seconds between the first and the last submission
    pub total_time: i64,
    /// Segments per second
    pub throughput: String,
    /// Throughput divided across the connections used
    pub per_connection: String,
    pub connections: Vec<ConnectionCount>,
}

impl Report {
    pub fn new(id: CampaignId, total: i64, stats: CampaignReportStats) -> Self {
        let msg_size = i64::from(stats.msg_size);
        let mut report = Self {
            id,
            total,
            msg_size,
            total_msgs: total * msg_size,
            first_queued: stats.first_queued,
            last_sent: stats.last_sent,
            total_time: 0,
            throughput: "0".to_string(),
            per_connection: "0".to_string(),
            connections: stats.connections,
        };
        if report.last_sent == 0 {
            return report;
        }

        report.total_time = report.last_sent - report.first_queued;
        let throughput = if report.total_time <= 0 {
            report.total_msgs as f64
        } else {
            report.total_msgs as f64 / report.total_time as f64
        };
        report.throughput = format!("{:.2}", throughput);
        if !report.connections.is_empty() {
            report.per_connection =
                format!("{:.2}", throughput / report.connections.len() as f64);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn conns(list: &[(&str, i64)]) -> Vec<ConnectionCount> {
        list.iter()
            .map(|(name, count)| ConnectionCount {
                name: name.to_string(),
                count: *count,
            })
            .collect()
    }

    #[test]
    fn test_progress_pending() {
        let stats = MessageStats {
            queued: 40,
            sent: 40,
            delivered: 10,
            total: 90,
            ..Default::default()
        };
        let p = Progress::new(100, &stats);
        assert_eq!(p.pending, 10);
        assert_eq!(
            p.total,
            p.queued + p.delivered + p.not_delivered + p.sent + p.error + p.scheduled + p.stopped + p.pending
        );
    }

    #[test]
    fn test_report_nothing_sent() {
        let r = Report::new(1, 10, CampaignReportStats { msg_size: 2, ..Default::default() });
        assert_eq!(r.total_msgs, 20);
        assert_eq!(r.throughput, "0");
        assert_eq!(r.per_connection, "0");
        assert_eq!(r.total_time, 0);
    }

    #[test]
    fn test_report_throughput() {
        let r = Report::new(
            7,
            100,
            CampaignReportStats {
                msg_size: 3,
                first_queued: 1_000,
                last_sent: 1_040,
                connections: conns(&[("c1", 60), ("c2", 40)]),
            },
        );
        assert_eq!(r.total_msgs, 300);
        assert_eq!(r.total_time, 40);
        assert_eq!(r.throughput, "7.50");
        assert_eq!(r.per_connection, "3.75");
    }

    #[test]
    fn test_report_burst_within_a_second() {
        let r = Report::new(
            7,
            5,
            CampaignReportStats {
                msg_size: 1,
                first_queued: 1_000,
                last_sent: 1_000,
                connections: conns(&[("c1", 5)]),
            },
        );
        assert_eq!(r.throughput, "5.00");
        assert_eq!(r.per_connection, "5.00");
    }
}
