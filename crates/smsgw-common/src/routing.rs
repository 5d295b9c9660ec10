//! Destination routing
//!
//! A destination is routed by the first connection prefix, in configuration
//! order, that is a leading substring of the number. Ordering in the config
//! file therefore decides specificity; this is not longest-prefix matching.

use crate::config::{Config, ConnGroup};
use crate::Result;

/// Routing key for a group and prefix key
pub fn routing_key(group: &str, prefix: &str) -> String {
    format!("{}-{}", group, prefix)
}

impl ConnGroup {
    /// First configured prefix that `dst` starts with, else the default prefix
    pub fn resolve_prefix(&self, dst: &str) -> &str {
        self.conns
            .iter()
            .flat_map(|c| c.pfxs.iter())
            .find(|pfx| dst.starts_with(pfx.as_str()))
            .map(String::as_str)
            .unwrap_or(&self.default_pfx)
    }
}

/// Resolve the prefix key for `dst` within the named group
pub fn resolve_prefix(config: &Config, group: &str, dst: &str) -> Result<String> {
    Ok(config.group(group)?.resolve_prefix(dst).to_string())
}

/// Resolve the full routing key for `dst` within the named group
pub fn resolve_key(config: &Config, group: &str, dst: &str) -> Result<String> {
    let pfx = resolve_prefix(config, group, dst)?;
    Ok(routing_key(group, &pfx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Conn;
    use crate::Error;

    fn conn(id: &str, pfxs: &[&str]) -> Conn {
        Conn {
            id: id.to_string(),
            url: "127.0.0.1:2775".to_string(),
            user: "u".to_string(),
            passwd: "p".to_string(),
            size: 1,
            time: 1,
            pfxs: pfxs.iter().map(|p| p.to_string()).collect(),
            receiver: None,
            segmentation: Default::default(),
            fields: Default::default(),
        }
    }

    fn group() -> ConnGroup {
        ConnGroup {
            name: "Default".to_string(),
            default_pfx: "92".to_string(),
            conns: vec![conn("a", &["9230", "92300"]), conn("b", &["92333"])],
        }
    }

    #[test]
    fn test_first_match_in_config_order() {
        let g = group();
        // "9230" is listed before the longer "92300" and wins
        assert_eq!(g.resolve_prefix("923001234567"), "9230");
        assert_eq!(g.resolve_prefix("923331234567"), "92333");
    }

    #[test]
    fn test_falls_back_to_default() {
        let g = group();
        assert_eq!(g.resolve_prefix("447700900000"), "92");
        assert_eq!(g.resolve_prefix(""), "92");
    }

    #[test]
    fn test_resolved_prefix_is_leading_substring() {
        let g = group();
        for dst in ["923001234567", "923331234567", "9230", "923"] {
            let pfx = g.resolve_prefix(dst);
            assert!(dst.starts_with(pfx) || pfx == g.default_pfx);
            // deterministic under a fixed configuration
            assert_eq!(pfx, g.resolve_prefix(dst));
        }
    }

    #[test]
    fn test_unknown_group() {
        let config = Config {
            database: crate::config::DatabaseConfig {
                url: "postgres://localhost/smsgw".to_string(),
                max_connections: 1,
                min_connections: 1,
            },
            broker: Default::default(),
            http: Default::default(),
            storage: Default::default(),
            logging: Default::default(),
            scheduler: Default::default(),
            worker: Default::default(),
            conn_groups: vec![group()],
        };
        assert_eq!(
            resolve_key(&config, "Default", "923331234567").unwrap(),
            "Default-92333"
        );
        assert!(matches!(
            resolve_prefix(&config, "Nope", "923331234567"),
            Err(Error::Config(_))
        ));
    }
}
