//! PubSub connection and reader-group configuration model
//!
//! Mirrors the subscriber side of a PubSub configuration: one connection
//! per transport address, reader groups keyed by writer-group id, dataset
//! readers keyed by dataset-writer id.

use serde::{Deserialize, Serialize};

use uamesh_core::messages::MessageSecurityMode;

/// Default reception buffer size in bytes
pub const DEFAULT_PUBSUB_BUFFER_SIZE: u32 = 4096;

/// Pre-sized cap on distinct publishers tracked by one scheduler
pub const DEFAULT_MAX_PUBLISHERS_PER_SCHEDULER: usize = 10;

/// Pre-sized cap on dataset messages tracked per publisher
pub const DEFAULT_MAX_MESSAGES_PER_PUBLISHER: usize = 10;

/// Default security-key-set group id
pub const SKS_DEFAULT_GROUP_ID: u32 = 1;

/// Default security-token id; the subscriber manages exactly one active
/// token per group
pub const SKS_DEFAULT_TOKEN_ID: u32 = 1;

/// Publisher identifier carried in the UADP header, sized by its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherId {
    Byte(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
}

impl PublisherId {
    /// Numeric value regardless of wire width
    pub fn value(self) -> u64 {
        match self {
            PublisherId::Byte(v) => v as u64,
            PublisherId::UInt16(v) => v as u64,
            PublisherId::UInt32(v) => v as u64,
            PublisherId::UInt64(v) => v,
        }
    }

    /// Two ids match when their numeric values are equal, whatever the
    /// declared width
    pub fn matches(self, other: PublisherId) -> bool {
        self.value() == other.value()
    }
}

impl std::fmt::Display for PublisherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Security mode of a PubSub group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl From<SecurityMode> for MessageSecurityMode {
    fn from(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::None => MessageSecurityMode::None,
            SecurityMode::Sign => MessageSecurityMode::Sign,
            SecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        }
    }
}

/// One expected field of a dataset message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    /// Builtin type id the field is expected to carry
    pub builtin_type: u8,
}

/// Subscriber-side view of one dataset writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetReaderConfig {
    /// DataSetWriterId this reader accepts
    pub writer_id: u16,
    pub fields: Vec<FieldMetadata>,
}

/// Subscriber-side view of one writer group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderGroupConfig {
    pub publisher_id: PublisherId,
    pub writer_group_id: u16,
    pub group_version: u32,
    #[serde(default)]
    pub security_mode: SecurityMode,
    /// MQTT topic; a default is synthesized when absent
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    pub readers: Vec<DataSetReaderConfig>,
}

/// One reception connection (UDP multicast, raw Ethernet or MQTT)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubConnectionConfig {
    /// Transport URL, e.g. `opc.udp://232.1.2.100:4840`,
    /// `opc.eth://01-00-5E-00-00-01`, `mqtt://broker:1883`
    pub address: String,
    #[serde(default)]
    pub interface_name: Option<String>,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    pub reader_groups: Vec<ReaderGroupConfig>,
}

/// Subscriber-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub connections: Vec<SubConnectionConfig>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
}

fn default_buffer_size() -> u32 {
    DEFAULT_PUBSUB_BUFFER_SIZE
}

/// Topic used when a reader group declares none
pub fn default_mqtt_topic(publisher_id: PublisherId, writer_group_id: u16) -> String {
    format!("uamesh/{}/{}", publisher_id.value(), writer_group_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_ids_match_across_widths() {
        assert!(PublisherId::Byte(3).matches(PublisherId::UInt16(3)));
        assert!(!PublisherId::UInt32(3).matches(PublisherId::UInt32(4)));
    }

    #[test]
    fn default_topic_shape() {
        assert_eq!(
            default_mqtt_topic(PublisherId::UInt16(3), 10),
            "uamesh/3/10"
        );
    }

    #[test]
    fn config_parses_from_json() {
        let json = r#"{
            "connections": [{
                "address": "opc.udp://232.1.2.100:4840",
                "reader_groups": [{
                    "publisher_id": {"u_int16": 3},
                    "writer_group_id": 10,
                    "group_version": 0,
                    "readers": [{
                        "writer_id": 62541,
                        "fields": [
                            {"name": "message", "builtin_type": 12},
                            {"name": "answer", "builtin_type": 7}
                        ]
                    }]
                }]
            }]
        }"#;
        let config: SubscriberConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.buffer_size, DEFAULT_PUBSUB_BUFFER_SIZE);
        assert_eq!(config.connections[0].reader_groups[0].writer_group_id, 10);
        assert_eq!(
            config.connections[0].reader_groups[0].security_mode,
            SecurityMode::None
        );
    }
}
