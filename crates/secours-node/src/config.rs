//! Node configuration.
//!
//! Built once in `main` and passed through startup; nothing in the engine
//! reads process-global state. Environment variables override defaults.

use std::path::PathBuf;
use std::time::Duration;

use secours_shared::constants::{DEFAULT_GOSSIP_PORT, SYNC_INTERVAL_SECS};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// TCP gossip port; also the UDP discovery port.
    pub port: u16,
    /// Display name advertised in heartbeats.
    pub nick: String,
    /// Directory holding the database and identity files.
    pub data_dir: PathBuf,
    /// Peers to refuse: entries match a node id exactly or an address
    /// substring. Useful for staging partition drills without touching
    /// the network.
    pub deny_peers: Vec<String>,
    /// Anti-entropy tick interval.
    pub sync_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GOSSIP_PORT,
            nick: "Anonymous".to_string(),
            data_dir: PathBuf::from("."),
            deny_peers: Vec::new(),
            sync_interval: Duration::from_secs(SYNC_INTERVAL_SECS),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("GOSSIP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid GOSSIP_PORT, using default");
            }
        }

        if let Ok(nick) = std::env::var("NICK") {
            if !nick.trim().is_empty() {
                config.nick = nick;
            }
        }

        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(deny) = std::env::var("DENY_PEERS") {
            config.deny_peers = deny
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(secs) = std::env::var("SYNC_INTERVAL_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.sync_interval = Duration::from_secs(parsed.max(1));
            }
        }

        config
    }

    /// `crisis_<port>.db` under the data dir.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("crisis_{}.db", self.port))
    }

    /// `identity_<port>.json` under the data dir.
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join(format!("identity_{}.json", self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.nick, "Anonymous");
        assert!(config.deny_peers.is_empty());
        assert_eq!(config.sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_derived_paths_follow_port() {
        let config = NodeConfig {
            port: 9002,
            data_dir: PathBuf::from("/var/lib/secours"),
            ..Default::default()
        };
        assert_eq!(
            config.db_path(),
            PathBuf::from("/var/lib/secours/crisis_9002.db")
        );
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/var/lib/secours/identity_9002.json")
        );
    }
}
