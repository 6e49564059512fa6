//! Byte-exact wire vectors for the binary codec
//!
//! These pin the on-wire layout of representative values so a codec change
//! that still round-trips cannot silently alter the format.

use crate::buffer::Buffer;
use crate::builtin;
use crate::codec::CodecConfig;
use crate::types::nodeid::NodeId;
use crate::types::string::UaString;
use crate::types::variant::{builtin_id, ArrayValue, Matrix, ScalarValue, Variant};
use crate::types::DataValue;

fn encode_variant(variant: &Variant) -> Vec<u8> {
    let config = CodecConfig::default();
    let mut buf = Buffer::new(4096);
    variant.encode(&mut buf, &config.ctx()).unwrap();
    buf.as_bytes().to_vec()
}

fn decode_variant(bytes: &[u8]) -> Variant {
    let config = CodecConfig::default();
    let mut buf = Buffer::from_bytes(bytes);
    let variant = Variant::decode(&mut buf, &config.ctx()).unwrap();
    assert_eq!(buf.position(), buf.length(), "trailing bytes after decode");
    variant
}

#[test]
fn node_id_two_bytes_vector() {
    let mut buf = Buffer::new(16);
    NodeId::numeric(0, 42).encode(&mut buf).unwrap();
    assert_eq!(hex::encode(buf.as_bytes()), "002a");
}

#[test]
fn node_id_four_bytes_vector() {
    let mut buf = Buffer::new(16);
    NodeId::numeric(5, 300).encode(&mut buf).unwrap();
    assert_eq!(hex::encode(buf.as_bytes()), "01052c01");
}

#[test]
fn node_id_string_vector() {
    let mut buf = Buffer::new(32);
    NodeId::string(1, "Boiler").encode(&mut buf).unwrap();
    // form 0x03, ns 0x0001, length 6, "Boiler"
    assert_eq!(hex::encode(buf.as_bytes()), "03010006000000426f696c6572");
}

#[test]
fn uint32_scalar_variant_vector() {
    let bytes = encode_variant(&Variant::Scalar(ScalarValue::UInt32(42)));
    assert_eq!(hex::encode(&bytes), "072a000000");
    assert_eq!(
        decode_variant(&bytes),
        Variant::Scalar(ScalarValue::UInt32(42))
    );
}

#[test]
fn string_scalar_variant_vector() {
    let bytes = encode_variant(&Variant::Scalar(ScalarValue::String(UaString::from("Hi"))));
    assert_eq!(hex::encode(&bytes), "0c020000004869");
}

#[test]
fn int32_matrix_vector() {
    let variant = Variant::Matrix(Matrix {
        elements: ArrayValue::Int32(vec![1, 2, 3, 4, 5, 6]),
        dimensions: vec![2, 3],
    });
    let bytes = encode_variant(&variant);
    assert_eq!(bytes[0], builtin_id::INT32 | 0x80 | 0x40);
    assert_eq!(
        hex::encode(&bytes),
        "c606000000010000000200000003000000040000000500000006000000020000000200000003000000"
    );
    assert_eq!(decode_variant(&bytes), variant);
}

#[test]
fn null_string_vector() {
    let mut buf = Buffer::new(8);
    builtin::encode_string(&UaString::null(), &mut buf).unwrap();
    assert_eq!(hex::encode(buf.as_bytes()), "ffffffff");
}

#[test]
fn default_data_value_vector() {
    let config = CodecConfig::default();
    let mut buf = Buffer::new(8);
    DataValue::default().encode(&mut buf, &config.ctx()).unwrap();
    assert_eq!(hex::encode(buf.as_bytes()), "00");
}

#[test]
fn boolean_array_variant_vector() {
    let bytes = encode_variant(&Variant::Array(ArrayValue::Boolean(vec![true, false, true])));
    assert_eq!(hex::encode(&bytes), "8103000000010001");
}

#[test]
fn random_guid_node_id_roundtrip() {
    use crate::types::guid::Guid;
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let guid = Guid::new(rng.gen(), rng.gen(), rng.gen(), rng.gen());
    let node_id = NodeId::guid(2, guid);
    let config = CodecConfig::default();
    let mut buf = Buffer::new(64);
    node_id.encode(&mut buf).unwrap();
    assert_eq!(buf.length(), 19);
    buf.set_position(0).unwrap();
    assert_eq!(
        NodeId::decode(&mut buf, &config.limits).unwrap(),
        node_id
    );
}

#[test]
fn position_advances_by_encoded_size() {
    let config = CodecConfig::default();
    let variant = Variant::Scalar(ScalarValue::Int16(-314));
    let mut buf = Buffer::new(64);
    variant.encode(&mut buf, &config.ctx()).unwrap();
    let encoded = buf.position();
    buf.set_position(0).unwrap();
    let decoded = Variant::decode(&mut buf, &config.ctx()).unwrap();
    assert_eq!(buf.position(), encoded);
    assert_eq!(decoded, variant);
}
