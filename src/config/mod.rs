//! Configuration management for the pool server

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "grin-pool-stratum",
    about = "Stratum mining pool server for Grin",
    version,
    author
)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long, value_name = "FILE", env = "GRIN_POOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Worker listen address
    #[clap(short, long, env = "GRIN_POOL_LISTEN")]
    pub listen: Option<String>,

    /// Upstream grin node address
    #[clap(short, long, env = "GRIN_POOL_NODE")]
    pub node: Option<String>,

    /// Pool server id
    #[clap(short, long)]
    pub server_id: Option<u16>,

    /// Log level, overrides the config file
    #[clap(long)]
    pub log_level: Option<String>,

    /// Log format (plain, json), overrides the config file
    #[clap(long)]
    pub log_format: Option<String>,
}

/// Main configuration structure, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pool-wide settings
    pub grin_pool: PoolSettings,

    /// Pool server identity
    pub server: ServerSettings,

    /// Worker listener configuration
    pub workers: WorkersConfig,

    /// Upstream grin node connection
    pub grin_node: NodeConfig,

    /// Share-log producer configuration
    pub producer: ProducerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pool-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Directory for log files
    pub log_dir: PathBuf,
}

/// Pool server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Numeric server id, embedded in share-log records
    pub id: u16,
}

/// Worker listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Address the worker ports bind to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Max concurrent worker connections across all ports
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Listen ports, each with its own minimum share difficulty
    pub port_difficulty: Vec<WorkerPort>,
}

/// A listen port paired with its minimum share difficulty
///
/// Written in the config file as a `[port, difficulty]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPort {
    /// TCP port to listen on
    pub port: u16,
    /// Minimum difficulty for shares submitted on this port
    pub difficulty: u64,
}

impl Serialize for WorkerPort {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;
        let mut tup = ser.serialize_tuple(2)?;
        tup.serialize_element(&(self.port as u64))?;
        tup.serialize_element(&self.difficulty)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for WorkerPort {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        struct PortVisitor;

        impl<'de> serde::de::Visitor<'de> for PortVisitor {
            type Value = WorkerPort;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a [port, difficulty] pair")
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<WorkerPort, A::Error> {
                let port: u16 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let difficulty: u64 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                Ok(WorkerPort { port, difficulty })
            }
        }

        de.deserialize_seq(PortVisitor)
    }
}

/// Upstream node connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node host
    pub address: String,

    /// Node owner API port
    pub api_port: u16,

    /// Node stratum port
    pub stratum_port: u16,

    /// Stratum login
    pub login: String,

    /// Stratum password
    pub password: String,

    /// Reconnect delay in seconds after a lost connection
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Keepalive interval in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

/// Share-log producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Whether share logging is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Kafka broker addresses ("host:port")
    #[serde(default)]
    pub brokers: Vec<String>,

    /// Partition count per topic
    #[serde(default = "default_partitions")]
    pub partitions: i32,

    /// Edge-bits to topic-name routing
    #[serde(default)]
    pub topics: HashMap<String, String>,

    /// Free-form delivery options (compression, required_acks, timeouts)
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (plain, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file name under `grin_pool.log_dir`, stderr when unset
    pub file: Option<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_partitions() -> i32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Default for Config {
    /// Localhost defaults: one worker port at difficulty 1, producer
    /// disabled
    fn default() -> Self {
        Config {
            grin_pool: PoolSettings {
                log_dir: PathBuf::from("/var/log/grin-pool"),
            },
            server: ServerSettings { id: 0 },
            workers: WorkersConfig {
                listen_address: default_listen_address(),
                max_connections: default_max_connections(),
                port_difficulty: vec![WorkerPort {
                    port: 3333,
                    difficulty: 1,
                }],
            },
            grin_node: NodeConfig {
                address: "127.0.0.1".to_string(),
                api_port: 13413,
                stratum_port: 13416,
                login: "grin_pool".to_string(),
                password: String::new(),
                reconnect_secs: default_reconnect_secs(),
                keepalive_secs: default_keepalive_secs(),
            },
            producer: ProducerConfig {
                enabled: false,
                brokers: vec![],
                partitions: default_partitions(),
                topics: HashMap::new(),
                options: HashMap::new(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from command-line arguments
    pub fn from_args(args: Args) -> Result<Self> {
        // Load from file if specified
        if let Some(config_path) = &args.config {
            let mut config = Self::from_file(config_path)?;
            if let Some(level) = args.log_level {
                config.logging.level = level;
            }
            if let Some(format) = args.log_format {
                config.logging.format = format;
            }
            return Ok(config);
        }

        // Otherwise start from the defaults and apply CLI overrides
        let mut config = Config::default();
        config.grin_node.address = args
            .node
            .ok_or_else(|| Error::config("Node address is required"))?;
        if let Some(listen) = args.listen {
            config.workers.listen_address = listen;
        }
        if let Some(id) = args.server_id {
            config.server.id = id;
        }
        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers.port_difficulty.is_empty() {
            return Err(Error::config("At least one worker port is required"));
        }

        // Each listen port maps to exactly one difficulty
        let mut seen = HashSet::new();
        for wp in &self.workers.port_difficulty {
            if !seen.insert(wp.port) {
                return Err(Error::config(format!(
                    "Duplicate worker port: {}",
                    wp.port
                )));
            }
        }

        if self.workers.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0"));
        }

        if self.producer.enabled {
            if self.producer.brokers.is_empty() {
                return Err(Error::config(
                    "Producer is enabled but the broker list is empty",
                ));
            }
            if self.producer.topics.is_empty() {
                return Err(Error::config(
                    "Producer is enabled but no topics are configured",
                ));
            }
            if self.producer.partitions <= 0 {
                return Err(Error::config("Partition count must be greater than 0"));
            }
            for key in self.producer.topics.keys() {
                key.parse::<u32>().map_err(|_| {
                    Error::config(format!("Topic key is not an edge-bits value: {}", key))
                })?;
            }
        }

        Ok(())
    }

    /// Difficulty configured for a listen port, if any
    pub fn port_difficulty(&self, port: u16) -> Option<u64> {
        self.workers
            .port_difficulty
            .iter()
            .find(|wp| wp.port == port)
            .map(|wp| wp.difficulty)
    }

    /// Share-log topic for an edge-bits value, if configured
    pub fn topic_for_edge_bits(&self, edge_bits: u32) -> Option<&str> {
        self.producer
            .topics
            .get(&edge_bits.to_string())
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            grin_pool: PoolSettings {
                log_dir: PathBuf::from("/var/log/grin-pool"),
            },
            server: ServerSettings { id: 1 },
            workers: WorkersConfig {
                listen_address: "0.0.0.0".to_string(),
                port_difficulty: vec![
                    WorkerPort {
                        port: 3333,
                        difficulty: 1,
                    },
                    WorkerPort {
                        port: 4444,
                        difficulty: 8,
                    },
                ],
                max_connections: 1024,
            },
            grin_node: NodeConfig {
                address: "127.0.0.1".to_string(),
                api_port: 13413,
                stratum_port: 13416,
                login: "grin_pool".to_string(),
                password: "secret".to_string(),
                reconnect_secs: 5,
                keepalive_secs: 30,
            },
            producer: ProducerConfig {
                enabled: true,
                brokers: vec!["kafka1:9092".to_string()],
                topics: [
                    ("31".to_string(), "ShareLogGrinPrimary".to_string()),
                    ("29".to_string(), "ShareLogGrinSecondary".to_string()),
                ]
                .into_iter()
                .collect(),
                partitions: 1,
                options: HashMap::new(),
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port_difficulty(3333), Some(1));
        assert!(!config.producer.enabled);
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut config = sample_config();
        config.workers.port_difficulty.push(WorkerPort {
            port: 3333,
            difficulty: 16,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_ports_rejected() {
        let mut config = sample_config();
        config.workers.port_difficulty.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_producer_needs_brokers() {
        let mut config = sample_config();
        config.producer.brokers.clear();
        assert!(config.validate().is_err());

        // Disabled producer is fine without brokers
        config.producer.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_topic_keys_must_be_numeric() {
        let mut config = sample_config();
        config
            .producer
            .topics
            .insert("primary".to_string(), "ShareLog".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_difficulty_lookup() {
        let config = sample_config();
        assert_eq!(config.port_difficulty(3333), Some(1));
        assert_eq!(config.port_difficulty(4444), Some(8));
        assert_eq!(config.port_difficulty(5555), None);
    }

    #[test]
    fn test_topic_routing() {
        let config = sample_config();
        assert_eq!(config.topic_for_edge_bits(31), Some("ShareLogGrinPrimary"));
        assert_eq!(config.topic_for_edge_bits(29), Some("ShareLogGrinSecondary"));
        assert_eq!(config.topic_for_edge_bits(30), None);
    }

    #[test]
    fn test_config_serialization() {
        let config = sample_config();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("[grin_pool]"));
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[workers]"));
        assert!(toml.contains("[grin_node]"));
        assert!(toml.contains("[producer]"));
    }
}
