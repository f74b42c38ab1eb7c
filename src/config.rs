use crate::cli::Cli;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Main configuration combining server, replication, snapshot and blocking
/// settings.
///
/// Can be loaded from files, env vars, or CLI args with precedence order:
/// CLI > File > Environment > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

/// Address of the leader a follower replicates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for LeaderAddr {
    type Err = ConfigError;

    /// Parses `"<host> <port>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ConfigError::Validation(format!("replicaof must be \"<host> <port>\", got {:?}", s))
        };
        let mut parts = s.split_whitespace();
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for LeaderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub replicaof: Option<LeaderAddr>,
    /// How often WAIT re-checks the acknowledgement count.
    #[serde(default = "default_ack_poll_interval_ms")]
    pub ack_poll_interval_ms: u64,
    /// Delay before a follower reconnects to its leader.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replicaof: None,
            ack_poll_interval_ms: default_ack_poll_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_ack_poll_interval_ms() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_dir")]
    pub dir: String,
    #[serde(default = "default_dbfilename")]
    pub dbfilename: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            dbfilename: default_dbfilename(),
        }
    }
}

fn default_dir() -> String {
    ".".to_string()
}

fn default_dbfilename() -> String {
    "dump.rdb".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// Period of the blocked-client timeout sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_sweep_interval_ms() -> u64 {
    50
}

impl Config {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.server.host = host;
        }

        if let Ok(port_str) = std::env::var("REDIS_PORT") {
            if let Ok(port) = port_str.parse() {
                config.server.port = port;
            }
        }

        if let Ok(replicaof) = std::env::var("REDIS_REPLICAOF") {
            config.replication.replicaof = Some(replicaof.parse()?);
        }

        if let Ok(dir) = std::env::var("REDIS_DIR") {
            config.snapshot.dir = dir;
        }

        if let Ok(dbfilename) = std::env::var("REDIS_DBFILENAME") {
            config.snapshot.dbfilename = dbfilename;
        }

        Ok(config)
    }

    /// Create config with CLI args taking precedence over environment and file.
    ///
    /// Precedence: CLI > File > Environment > Defaults
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        let file_config = cli
            .config
            .as_ref()
            .map(Self::load_from_file)
            .transpose()?;

        let base = file_config.unwrap_or(env_config);

        let server = ServerConfig {
            host: cli.host.clone().unwrap_or(base.server.host),
            port: cli.port.unwrap_or(base.server.port),
        };

        let replicaof = match &cli.replicaof {
            Some(addr) => Some(addr.parse()?),
            None => base.replication.replicaof,
        };

        let snapshot = SnapshotConfig {
            dir: cli.dir.clone().unwrap_or(base.snapshot.dir),
            dbfilename: cli.dbfilename.clone().unwrap_or(base.snapshot.dbfilename),
        };

        let config = Config {
            server,
            replication: ReplicationConfig {
                replicaof,
                ..base.replication
            },
            snapshot,
            blocking: base.blocking,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication.ack_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "ack_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.blocking.sweep_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 6379);
        assert_eq!(config.replication.replicaof, None);
        assert_eq!(config.replication.ack_poll_interval_ms, 10);
        assert_eq!(config.blocking.sweep_interval_ms, 50);
    }

    #[test]
    fn test_leader_addr_parsing() {
        let addr: LeaderAddr = "localhost 6379".parse().unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 6379);
        assert_eq!(addr.to_string(), "localhost 6379");

        assert!("localhost".parse::<LeaderAddr>().is_err());
        assert!("localhost abc".parse::<LeaderAddr>().is_err());
        assert!("a 1 b".parse::<LeaderAddr>().is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!("reef-config-{}.json", std::process::id()));
        let mut file_config = Config::default();
        file_config.server.port = 7000;
        file_config.snapshot.dbfilename = "file.rdb".to_string();
        file_config.save_to_file(&path).unwrap();

        let cli = Cli {
            port: Some(7001),
            replicaof: Some("leader 6379".to_string()),
            config: Some(path.clone()),
            ..Cli::default()
        };
        let config = Config::from_sources(&cli).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.port, 7001);
        assert_eq!(config.snapshot.dbfilename, "file.rdb");
        assert_eq!(
            config.replication.replicaof,
            Some(LeaderAddr {
                host: "leader".to_string(),
                port: 6379
            })
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"server": {"port": 6380}}"#).unwrap();
        assert_eq!(config.server.port, 6380);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.snapshot.dbfilename, "dump.rdb");
    }

    #[test]
    fn test_invalid_replicaof_is_rejected() {
        let cli = Cli {
            replicaof: Some("nonsense".to_string()),
            ..Cli::default()
        };
        assert!(matches!(
            Config::from_sources(&cli),
            Err(ConfigError::Validation(_))
        ));
    }
}
