//! Kafka share-log producer

use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::producer::share::Share;
use kafka::client::{
    Compression, DEFAULT_CONNECTION_IDLE_TIMEOUT_MILLIS, KafkaClient, RequiredAcks,
};
use kafka::producer::{AsBytes, DEFAULT_ACK_TIMEOUT_MILLIS, Producer, Record};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Bincode-encoded share record, as handed to the kafka client
#[derive(Debug)]
struct ShareBytes(Vec<u8>);

impl ShareBytes {
    fn encode(share: &Share) -> Result<Self> {
        let bytes =
            bincode::serialize(share).map_err(|e| Error::producer(format!("encode: {}", e)))?;
        Ok(ShareBytes(bytes))
    }
}

impl AsBytes for ShareBytes {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Delivery options decoded from `[producer] options`
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Message compression
    pub compression: Compression,
    /// Broker acknowledgment mode
    pub required_acks: RequiredAcks,
    /// Idle timeout for broker connections
    pub conn_idle_timeout: Duration,
    /// How long to wait for broker acks
    pub ack_timeout: Duration,
}

impl ProducerOptions {
    /// Decode options from the free-form config map, falling back to
    /// the kafka library defaults for absent keys
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let compression = match options.get("compression").map(|s| s.as_str()) {
            None => Compression::NONE,
            Some(s) if s.eq_ignore_ascii_case("none") => Compression::NONE,
            Some(s) if s.eq_ignore_ascii_case("gzip") => Compression::GZIP,
            Some(s) if s.eq_ignore_ascii_case("snappy") => Compression::SNAPPY,
            Some(s) => {
                return Err(Error::config(format!("Unsupported compression type: {}", s)));
            }
        };

        let required_acks = match options.get("required_acks").map(|s| s.as_str()) {
            None => RequiredAcks::One,
            Some(s) if s.eq_ignore_ascii_case("none") => RequiredAcks::None,
            Some(s) if s.eq_ignore_ascii_case("one") => RequiredAcks::One,
            Some(s) if s.eq_ignore_ascii_case("all") => RequiredAcks::All,
            Some(s) => {
                return Err(Error::config(format!("Unknown required_acks value: {}", s)));
            }
        };

        Ok(Self {
            compression,
            required_acks,
            conn_idle_timeout: Duration::from_millis(millis_option(
                options,
                "conn_idle_timeout",
                DEFAULT_CONNECTION_IDLE_TIMEOUT_MILLIS,
            )?),
            ack_timeout: Duration::from_millis(millis_option(
                options,
                "ack_timeout",
                DEFAULT_ACK_TIMEOUT_MILLIS,
            )?),
        })
    }
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            compression: Compression::NONE,
            required_acks: RequiredAcks::One,
            conn_idle_timeout: Duration::from_millis(DEFAULT_CONNECTION_IDLE_TIMEOUT_MILLIS),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MILLIS),
        }
    }
}

fn millis_option(options: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    match options.get(key) {
        None => Ok(default),
        Some(s) => s
            .parse::<u64>()
            .map_err(|_| Error::config(format!("Invalid {} value: {}", key, s))),
    }
}

/// Blocking Kafka producer for share-log records
///
/// Runs on a dedicated blocking task; see [`super::start`].
pub struct KafkaShareLog {
    producer: Producer,
    topics: HashMap<u32, String>,
    partitions: i32,
}

impl KafkaShareLog {
    /// Connect to the configured brokers and create the producer
    pub fn from_config(cfg: &ProducerConfig) -> Result<KafkaShareLog> {
        let options = ProducerOptions::from_map(&cfg.options)?;

        let mut client = KafkaClient::new(cfg.brokers.clone());
        client.set_client_id("kafka-grin-pool".into());
        client.load_metadata_all()?;

        let producer = Producer::from_client(client)
            .with_ack_timeout(options.ack_timeout)
            .with_required_acks(options.required_acks)
            .with_compression(options.compression)
            .with_connection_idle_timeout(options.conn_idle_timeout)
            .create()?;

        let mut topics = HashMap::new();
        for (key, topic) in &cfg.topics {
            let edge_bits = key
                .parse::<u32>()
                .map_err(|_| Error::config(format!("Topic key is not an edge-bits value: {}", key)))?;
            topics.insert(edge_bits, topic.clone());
        }

        info!(
            brokers = ?cfg.brokers,
            partitions = cfg.partitions,
            "Share log producer connected"
        );

        Ok(KafkaShareLog {
            producer,
            topics,
            partitions: cfg.partitions,
        })
    }

    /// Publish one share record, routed by edge-bits
    pub fn send(&mut self, edge_bits: u32, share: &Share) -> Result<()> {
        let topic = self.topics.get(&edge_bits).ok_or_else(|| {
            Error::producer(format!("No share-log topic for edge_bits {}", edge_bits))
        })?;

        let partition = share.user_id.rem_euclid(self.partitions);
        let record = Record::from_value(topic, ShareBytes::encode(share)?).with_partition(partition);
        self.producer.send(&record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ProducerOptions::from_map(&HashMap::new()).unwrap();
        assert!(matches!(options.compression, Compression::NONE));
        assert!(matches!(options.required_acks, RequiredAcks::One));
        assert_eq!(
            options.ack_timeout,
            Duration::from_millis(DEFAULT_ACK_TIMEOUT_MILLIS)
        );
    }

    #[test]
    fn test_options_parsing() {
        let map: HashMap<String, String> = [
            ("compression".to_string(), "gzip".to_string()),
            ("required_acks".to_string(), "all".to_string()),
            ("ack_timeout".to_string(), "250".to_string()),
            ("conn_idle_timeout".to_string(), "10000".to_string()),
        ]
        .into_iter()
        .collect();

        let options = ProducerOptions::from_map(&map).unwrap();
        assert!(matches!(options.compression, Compression::GZIP));
        assert!(matches!(options.required_acks, RequiredAcks::All));
        assert_eq!(options.ack_timeout, Duration::from_millis(250));
        assert_eq!(options.conn_idle_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_unknown_options_rejected() {
        let map: HashMap<String, String> =
            [("compression".to_string(), "zstd".to_string())].into_iter().collect();
        assert!(ProducerOptions::from_map(&map).is_err());

        let map: HashMap<String, String> =
            [("ack_timeout".to_string(), "soon".to_string())].into_iter().collect();
        assert!(ProducerOptions::from_map(&map).is_err());
    }
}
