//! Reader layer: match decoded network messages against the configured
//! reader groups and deliver field values to the target sink
//!
//! A dataset message is delivered when its (publisher id, writer group id,
//! dataset-writer id) triple names a configured reader, the group version
//! matches when one is pinned, and every field carries the builtin type the
//! reader declared.

use tracing::debug;

use uamesh_core::types::variant::Variant;
use uamesh_net::config::{PublisherId, SubConnectionConfig};
use uamesh_net::uadp::NetworkMessage;

/// One delivered dataset update
#[derive(Debug)]
pub struct TargetUpdate {
    pub publisher_id: PublisherId,
    pub writer_group_id: u16,
    pub writer_id: u16,
    pub fields: Vec<(String, Variant)>,
}

/// Application-side variable store fed by the subscriber
pub trait SubTargetVariable: Send + Sync {
    /// Returns false when the update could not be applied
    fn set_target_variables(&self, update: TargetUpdate) -> bool;
}

/// Dispatch every matching dataset message of `message`; returns the number
/// of delivered updates
pub fn dispatch(
    connection: &SubConnectionConfig,
    message: NetworkMessage,
    target: &dyn SubTargetVariable,
) -> usize {
    let Some(publisher_id) = message.publisher_id else {
        debug!("network message without publisher id, no reader can match");
        return 0;
    };
    let Some(writer_group_id) = message.group_header.and_then(|g| g.writer_group_id) else {
        debug!("network message without writer group id, no reader can match");
        return 0;
    };
    let group_version = message.group_header.and_then(|g| g.group_version);

    let Some(group) = connection.reader_groups.iter().find(|group| {
        group.publisher_id.matches(publisher_id) && group.writer_group_id == writer_group_id
    }) else {
        debug!(%publisher_id, writer_group_id, "no reader group for message");
        return 0;
    };

    if group.group_version != 0 {
        match group_version {
            Some(version) if version == group.group_version => {}
            _ => {
                debug!(
                    expected = group.group_version,
                    received = ?group_version,
                    "group version mismatch"
                );
                return 0;
            }
        }
    }

    let mut delivered = 0;
    for dataset in message.messages {
        let Some(reader) = group
            .readers
            .iter()
            .find(|reader| reader.writer_id == dataset.writer_id)
        else {
            debug!(writer_id = dataset.writer_id, "no dataset reader for writer");
            continue;
        };

        if reader.fields.len() != dataset.fields.len() {
            debug!(
                writer_id = dataset.writer_id,
                expected = reader.fields.len(),
                received = dataset.fields.len(),
                "field count mismatch"
            );
            continue;
        }
        let types_match = reader
            .fields
            .iter()
            .zip(&dataset.fields)
            .all(|(meta, field)| meta.builtin_type == field.builtin_type_id());
        if !types_match {
            debug!(writer_id = dataset.writer_id, "field type mismatch");
            continue;
        }

        let fields = reader
            .fields
            .iter()
            .map(|meta| meta.name.clone())
            .zip(dataset.fields)
            .collect();
        let update = TargetUpdate {
            publisher_id,
            writer_group_id,
            writer_id: dataset.writer_id,
            fields,
        };
        if target.set_target_variables(update) {
            delivered += 1;
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uamesh_core::types::string::UaString;
    use uamesh_core::types::variant::{builtin_id, ScalarValue};
    use uamesh_net::config::{DataSetReaderConfig, FieldMetadata, ReaderGroupConfig, SecurityMode};
    use uamesh_net::uadp::{DataSetMessage, GroupHeader};

    struct Recorder(Mutex<Vec<TargetUpdate>>);

    impl SubTargetVariable for Recorder {
        fn set_target_variables(&self, update: TargetUpdate) -> bool {
            self.0.lock().unwrap().push(update);
            true
        }
    }

    fn connection() -> SubConnectionConfig {
        SubConnectionConfig {
            address: "opc.udp://232.1.2.100:4840".into(),
            interface_name: None,
            mqtt_username: None,
            mqtt_password: None,
            reader_groups: vec![ReaderGroupConfig {
                publisher_id: PublisherId::UInt16(3),
                writer_group_id: 10,
                group_version: 0,
                security_mode: SecurityMode::None,
                mqtt_topic: None,
                readers: vec![DataSetReaderConfig {
                    writer_id: 62541,
                    fields: vec![
                        FieldMetadata {
                            name: "message".into(),
                            builtin_type: builtin_id::STRING,
                        },
                        FieldMetadata {
                            name: "answer".into(),
                            builtin_type: builtin_id::UINT32,
                        },
                    ],
                }],
            }],
        }
    }

    fn message(writer_id: u16, fields: Vec<Variant>) -> NetworkMessage {
        NetworkMessage {
            publisher_id: Some(PublisherId::UInt16(3)),
            group_header: Some(GroupHeader {
                writer_group_id: Some(10),
                group_version: Some(0),
                ..GroupHeader::default()
            }),
            timestamp: None,
            picoseconds: None,
            messages: vec![DataSetMessage {
                writer_id,
                sequence_number: Some(1),
                fields,
            }],
        }
    }

    #[test]
    fn matching_message_is_delivered_in_order() {
        let connection = connection();
        let target = Recorder(Mutex::new(Vec::new()));
        let delivered = dispatch(
            &connection,
            message(
                62541,
                vec![
                    Variant::Scalar(ScalarValue::String(UaString::from("hello"))),
                    Variant::Scalar(ScalarValue::UInt32(42)),
                ],
            ),
            &target,
        );
        assert_eq!(delivered, 1);
        let updates = target.0.into_inner().unwrap();
        assert_eq!(updates[0].fields[0].0, "message");
        assert_eq!(updates[0].fields[1].0, "answer");
        assert_eq!(
            updates[0].fields[1].1,
            Variant::Scalar(ScalarValue::UInt32(42))
        );
    }

    #[test]
    fn unknown_writer_is_skipped() {
        let connection = connection();
        let target = Recorder(Mutex::new(Vec::new()));
        let delivered = dispatch(
            &connection,
            message(9, vec![Variant::Scalar(ScalarValue::UInt32(1))]),
            &target,
        );
        assert_eq!(delivered, 0);
    }

    #[test]
    fn field_type_mismatch_is_skipped() {
        let connection = connection();
        let target = Recorder(Mutex::new(Vec::new()));
        let delivered = dispatch(
            &connection,
            message(
                62541,
                vec![
                    Variant::Scalar(ScalarValue::UInt32(1)),
                    Variant::Scalar(ScalarValue::UInt32(2)),
                ],
            ),
            &target,
        );
        assert_eq!(delivered, 0);
    }

    #[test]
    fn pinned_group_version_must_match() {
        let mut connection = connection();
        connection.reader_groups[0].group_version = 555;
        let target = Recorder(Mutex::new(Vec::new()));
        let delivered = dispatch(
            &connection,
            message(
                62541,
                vec![
                    Variant::Scalar(ScalarValue::String(UaString::from("x"))),
                    Variant::Scalar(ScalarValue::UInt32(2)),
                ],
            ),
            &target,
        );
        assert_eq!(delivered, 0);
    }
}
