//! Variant, arrays, matrices and DataValue
//!
//! The encoding byte carries the builtin type id in its low six bits, the
//! array-value flag in bit 7 and the dimensions flag in bit 6 (both set is
//! a matrix). A Variant must not directly contain a Variant; arrays of
//! Variant are allowed. Variant and DataValue containment is bounded by the
//! configured nested level.

use crate::buffer::Buffer;
use crate::builtin::{self, DateTime};
use crate::codec::{self, CodecCtx};
use crate::status::{Result, Status};
use crate::types::diagnostic::DiagnosticInfo;
use crate::types::extension::ExtensionObject;
use crate::types::guid::Guid;
use crate::types::nodeid::{ExpandedNodeId, NodeId};
use crate::types::qualified::{LocalizedText, QualifiedName};
use crate::types::string::{ByteString, StatusCode, UaString, XmlElement};

/// Builtin type ids as they appear in the Variant encoding byte
pub mod builtin_id {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const SBYTE: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const INT16: u8 = 4;
    pub const UINT16: u8 = 5;
    pub const INT32: u8 = 6;
    pub const UINT32: u8 = 7;
    pub const INT64: u8 = 8;
    pub const UINT64: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const DOUBLE: u8 = 11;
    pub const STRING: u8 = 12;
    pub const DATE_TIME: u8 = 13;
    pub const GUID: u8 = 14;
    pub const BYTE_STRING: u8 = 15;
    pub const XML_ELEMENT: u8 = 16;
    pub const NODE_ID: u8 = 17;
    pub const EXPANDED_NODE_ID: u8 = 18;
    pub const STATUS_CODE: u8 = 19;
    pub const QUALIFIED_NAME: u8 = 20;
    pub const LOCALIZED_TEXT: u8 = 21;
    pub const EXTENSION_OBJECT: u8 = 22;
    pub const DATA_VALUE: u8 = 23;
    pub const VARIANT: u8 = 24;
    pub const DIAGNOSTIC_INFO: u8 = 25;
}

/// Bit 7: an array value follows
pub const FLAG_ARRAY_VALUE: u8 = 0x80;
/// Bit 6: array dimensions follow (matrix, together with bit 7)
pub const FLAG_ARRAY_DIMENSIONS: u8 = 0x40;

/// Scalar payload of a Variant. A scalar Variant-in-Variant is
/// unrepresentable by construction.
#[derive(Debug, Default, PartialEq)]
pub enum ScalarValue {
    #[default]
    Null,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UaString),
    DateTime(DateTime),
    Guid(Box<Guid>),
    ByteString(ByteString),
    XmlElement(XmlElement),
    NodeId(Box<NodeId>),
    ExpandedNodeId(Box<ExpandedNodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    ExtensionObject(Box<ExtensionObject>),
    DataValue(Box<DataValue>),
    DiagnosticInfo(Box<DiagnosticInfo>),
}

/// Homogeneous array payload of a Variant
#[derive(Debug, PartialEq)]
pub enum ArrayValue {
    Boolean(Vec<bool>),
    SByte(Vec<i8>),
    Byte(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<UaString>),
    DateTime(Vec<DateTime>),
    Guid(Vec<Guid>),
    ByteString(Vec<ByteString>),
    XmlElement(Vec<XmlElement>),
    NodeId(Vec<NodeId>),
    ExpandedNodeId(Vec<ExpandedNodeId>),
    StatusCode(Vec<StatusCode>),
    QualifiedName(Vec<QualifiedName>),
    LocalizedText(Vec<LocalizedText>),
    ExtensionObject(Vec<ExtensionObject>),
    DataValue(Vec<DataValue>),
    Variant(Vec<Variant>),
    DiagnosticInfo(Vec<DiagnosticInfo>),
}

/// Flat element storage plus per-dimension extents; the product of the
/// extents equals the flat length
#[derive(Debug, PartialEq)]
pub struct Matrix {
    pub elements: ArrayValue,
    pub dimensions: Vec<i32>,
}

#[derive(Debug, Default, PartialEq)]
pub enum Variant {
    #[default]
    Null,
    Scalar(ScalarValue),
    Array(ArrayValue),
    Matrix(Matrix),
}

impl ScalarValue {
    fn builtin_type_id(&self) -> u8 {
        match self {
            ScalarValue::Null => builtin_id::NULL,
            ScalarValue::Boolean(_) => builtin_id::BOOLEAN,
            ScalarValue::SByte(_) => builtin_id::SBYTE,
            ScalarValue::Byte(_) => builtin_id::BYTE,
            ScalarValue::Int16(_) => builtin_id::INT16,
            ScalarValue::UInt16(_) => builtin_id::UINT16,
            ScalarValue::Int32(_) => builtin_id::INT32,
            ScalarValue::UInt32(_) => builtin_id::UINT32,
            ScalarValue::Int64(_) => builtin_id::INT64,
            ScalarValue::UInt64(_) => builtin_id::UINT64,
            ScalarValue::Float(_) => builtin_id::FLOAT,
            ScalarValue::Double(_) => builtin_id::DOUBLE,
            ScalarValue::String(_) => builtin_id::STRING,
            ScalarValue::DateTime(_) => builtin_id::DATE_TIME,
            ScalarValue::Guid(_) => builtin_id::GUID,
            ScalarValue::ByteString(_) => builtin_id::BYTE_STRING,
            ScalarValue::XmlElement(_) => builtin_id::XML_ELEMENT,
            ScalarValue::NodeId(_) => builtin_id::NODE_ID,
            ScalarValue::ExpandedNodeId(_) => builtin_id::EXPANDED_NODE_ID,
            ScalarValue::StatusCode(_) => builtin_id::STATUS_CODE,
            ScalarValue::QualifiedName(_) => builtin_id::QUALIFIED_NAME,
            ScalarValue::LocalizedText(_) => builtin_id::LOCALIZED_TEXT,
            ScalarValue::ExtensionObject(_) => builtin_id::EXTENSION_OBJECT,
            ScalarValue::DataValue(_) => builtin_id::DATA_VALUE,
            ScalarValue::DiagnosticInfo(_) => builtin_id::DIAGNOSTIC_INFO,
        }
    }

    fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<()> {
        match self {
            ScalarValue::Null => Ok(()),
            ScalarValue::Boolean(v) => builtin::encode_bool(*v, buf),
            ScalarValue::SByte(v) => builtin::encode_i8(*v, buf),
            ScalarValue::Byte(v) => builtin::encode_u8(*v, buf),
            ScalarValue::Int16(v) => builtin::encode_i16(*v, buf),
            ScalarValue::UInt16(v) => builtin::encode_u16(*v, buf),
            ScalarValue::Int32(v) => builtin::encode_i32(*v, buf),
            ScalarValue::UInt32(v) => builtin::encode_u32(*v, buf),
            ScalarValue::Int64(v) => builtin::encode_i64(*v, buf),
            ScalarValue::UInt64(v) => builtin::encode_u64(*v, buf),
            ScalarValue::Float(v) => builtin::encode_f32(*v, buf),
            ScalarValue::Double(v) => builtin::encode_f64(*v, buf),
            ScalarValue::String(v) => builtin::encode_string(v, buf),
            ScalarValue::DateTime(v) => builtin::encode_datetime(*v, buf),
            ScalarValue::Guid(v) => v.encode(buf),
            ScalarValue::ByteString(v) => builtin::encode_byte_string(v, buf),
            ScalarValue::XmlElement(v) => builtin::encode_byte_string(v, buf),
            ScalarValue::NodeId(v) => v.encode(buf),
            ScalarValue::ExpandedNodeId(v) => v.encode(buf),
            ScalarValue::StatusCode(v) => builtin::encode_u32(v.0, buf),
            ScalarValue::QualifiedName(v) => v.encode(buf),
            ScalarValue::LocalizedText(v) => v.encode(buf),
            ScalarValue::ExtensionObject(v) => v.encode(buf, ctx),
            ScalarValue::DataValue(v) => v.encode_nested(buf, ctx, nested),
            ScalarValue::DiagnosticInfo(v) => v.encode(buf, ctx.limits),
        }
    }

    fn decode(buf: &mut Buffer, ctx: &CodecCtx, id: u8, nested: u32) -> Result<Self> {
        Ok(match id {
            builtin_id::NULL => ScalarValue::Null,
            builtin_id::BOOLEAN => ScalarValue::Boolean(builtin::decode_bool(buf)?),
            builtin_id::SBYTE => ScalarValue::SByte(builtin::decode_i8(buf)?),
            builtin_id::BYTE => ScalarValue::Byte(builtin::decode_u8(buf)?),
            builtin_id::INT16 => ScalarValue::Int16(builtin::decode_i16(buf)?),
            builtin_id::UINT16 => ScalarValue::UInt16(builtin::decode_u16(buf)?),
            builtin_id::INT32 => ScalarValue::Int32(builtin::decode_i32(buf)?),
            builtin_id::UINT32 => ScalarValue::UInt32(builtin::decode_u32(buf)?),
            builtin_id::INT64 => ScalarValue::Int64(builtin::decode_i64(buf)?),
            builtin_id::UINT64 => ScalarValue::UInt64(builtin::decode_u64(buf)?),
            builtin_id::FLOAT => ScalarValue::Float(builtin::decode_f32(buf)?),
            builtin_id::DOUBLE => ScalarValue::Double(builtin::decode_f64(buf)?),
            builtin_id::STRING => ScalarValue::String(builtin::decode_string(buf, ctx.limits)?),
            builtin_id::DATE_TIME => ScalarValue::DateTime(builtin::decode_datetime(buf)?),
            builtin_id::GUID => ScalarValue::Guid(Box::new(Guid::decode(buf)?)),
            builtin_id::BYTE_STRING => {
                ScalarValue::ByteString(builtin::decode_byte_string(buf, ctx.limits)?)
            }
            builtin_id::XML_ELEMENT => {
                ScalarValue::XmlElement(builtin::decode_byte_string(buf, ctx.limits)?)
            }
            builtin_id::NODE_ID => {
                ScalarValue::NodeId(Box::new(NodeId::decode(buf, ctx.limits)?))
            }
            builtin_id::EXPANDED_NODE_ID => {
                ScalarValue::ExpandedNodeId(Box::new(ExpandedNodeId::decode(buf, ctx.limits)?))
            }
            builtin_id::STATUS_CODE => ScalarValue::StatusCode(StatusCode(builtin::decode_u32(buf)?)),
            builtin_id::QUALIFIED_NAME => {
                ScalarValue::QualifiedName(Box::new(QualifiedName::decode(buf, ctx.limits)?))
            }
            builtin_id::LOCALIZED_TEXT => {
                ScalarValue::LocalizedText(Box::new(LocalizedText::decode(buf, ctx.limits)?))
            }
            builtin_id::EXTENSION_OBJECT => {
                ScalarValue::ExtensionObject(Box::new(ExtensionObject::decode(buf, ctx)?))
            }
            builtin_id::DATA_VALUE => {
                ScalarValue::DataValue(Box::new(DataValue::decode_nested(buf, ctx, nested)?))
            }
            // A scalar Variant must not contain a Variant
            builtin_id::VARIANT => return Err(Status::EncodingError),
            builtin_id::DIAGNOSTIC_INFO => {
                ScalarValue::DiagnosticInfo(Box::new(DiagnosticInfo::decode(buf, ctx.limits)?))
            }
            _ => return Err(Status::EncodingError),
        })
    }
}

impl ArrayValue {
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Boolean(v) => v.len(),
            ArrayValue::SByte(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Int64(v) => v.len(),
            ArrayValue::UInt64(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
            ArrayValue::String(v) => v.len(),
            ArrayValue::DateTime(v) => v.len(),
            ArrayValue::Guid(v) => v.len(),
            ArrayValue::ByteString(v) => v.len(),
            ArrayValue::XmlElement(v) => v.len(),
            ArrayValue::NodeId(v) => v.len(),
            ArrayValue::ExpandedNodeId(v) => v.len(),
            ArrayValue::StatusCode(v) => v.len(),
            ArrayValue::QualifiedName(v) => v.len(),
            ArrayValue::LocalizedText(v) => v.len(),
            ArrayValue::ExtensionObject(v) => v.len(),
            ArrayValue::DataValue(v) => v.len(),
            ArrayValue::Variant(v) => v.len(),
            ArrayValue::DiagnosticInfo(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn builtin_type_id(&self) -> u8 {
        match self {
            ArrayValue::Boolean(_) => builtin_id::BOOLEAN,
            ArrayValue::SByte(_) => builtin_id::SBYTE,
            ArrayValue::Byte(_) => builtin_id::BYTE,
            ArrayValue::Int16(_) => builtin_id::INT16,
            ArrayValue::UInt16(_) => builtin_id::UINT16,
            ArrayValue::Int32(_) => builtin_id::INT32,
            ArrayValue::UInt32(_) => builtin_id::UINT32,
            ArrayValue::Int64(_) => builtin_id::INT64,
            ArrayValue::UInt64(_) => builtin_id::UINT64,
            ArrayValue::Float(_) => builtin_id::FLOAT,
            ArrayValue::Double(_) => builtin_id::DOUBLE,
            ArrayValue::String(_) => builtin_id::STRING,
            ArrayValue::DateTime(_) => builtin_id::DATE_TIME,
            ArrayValue::Guid(_) => builtin_id::GUID,
            ArrayValue::ByteString(_) => builtin_id::BYTE_STRING,
            ArrayValue::XmlElement(_) => builtin_id::XML_ELEMENT,
            ArrayValue::NodeId(_) => builtin_id::NODE_ID,
            ArrayValue::ExpandedNodeId(_) => builtin_id::EXPANDED_NODE_ID,
            ArrayValue::StatusCode(_) => builtin_id::STATUS_CODE,
            ArrayValue::QualifiedName(_) => builtin_id::QUALIFIED_NAME,
            ArrayValue::LocalizedText(_) => builtin_id::LOCALIZED_TEXT,
            ArrayValue::ExtensionObject(_) => builtin_id::EXTENSION_OBJECT,
            ArrayValue::DataValue(_) => builtin_id::DATA_VALUE,
            ArrayValue::Variant(_) => builtin_id::VARIANT,
            ArrayValue::DiagnosticInfo(_) => builtin_id::DIAGNOSTIC_INFO,
        }
    }

    fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<()> {
        match self {
            ArrayValue::Boolean(v) => codec::encode_array(v, buf, |e, b| builtin::encode_bool(*e, b)),
            ArrayValue::SByte(v) => codec::encode_array(v, buf, |e, b| builtin::encode_i8(*e, b)),
            ArrayValue::Byte(v) => codec::encode_array(v, buf, |e, b| builtin::encode_u8(*e, b)),
            ArrayValue::Int16(v) => codec::encode_array(v, buf, |e, b| builtin::encode_i16(*e, b)),
            ArrayValue::UInt16(v) => codec::encode_array(v, buf, |e, b| builtin::encode_u16(*e, b)),
            ArrayValue::Int32(v) => codec::encode_array(v, buf, |e, b| builtin::encode_i32(*e, b)),
            ArrayValue::UInt32(v) => codec::encode_array(v, buf, |e, b| builtin::encode_u32(*e, b)),
            ArrayValue::Int64(v) => codec::encode_array(v, buf, |e, b| builtin::encode_i64(*e, b)),
            ArrayValue::UInt64(v) => codec::encode_array(v, buf, |e, b| builtin::encode_u64(*e, b)),
            ArrayValue::Float(v) => codec::encode_array(v, buf, |e, b| builtin::encode_f32(*e, b)),
            ArrayValue::Double(v) => codec::encode_array(v, buf, |e, b| builtin::encode_f64(*e, b)),
            ArrayValue::String(v) => codec::encode_array(v, buf, builtin::encode_string),
            ArrayValue::DateTime(v) => {
                codec::encode_array(v, buf, |e, b| builtin::encode_datetime(*e, b))
            }
            ArrayValue::Guid(v) => codec::encode_array(v, buf, |e, b| e.encode(b)),
            ArrayValue::ByteString(v) => codec::encode_array(v, buf, builtin::encode_byte_string),
            ArrayValue::XmlElement(v) => codec::encode_array(v, buf, builtin::encode_byte_string),
            ArrayValue::NodeId(v) => codec::encode_array(v, buf, |e, b| e.encode(b)),
            ArrayValue::ExpandedNodeId(v) => codec::encode_array(v, buf, |e, b| e.encode(b)),
            ArrayValue::StatusCode(v) => {
                codec::encode_array(v, buf, |e, b| builtin::encode_u32(e.0, b))
            }
            ArrayValue::QualifiedName(v) => codec::encode_array(v, buf, |e, b| e.encode(b)),
            ArrayValue::LocalizedText(v) => codec::encode_array(v, buf, |e, b| e.encode(b)),
            ArrayValue::ExtensionObject(v) => {
                codec::encode_array(v, buf, |e, b| e.encode(b, ctx))
            }
            ArrayValue::DataValue(v) => {
                codec::encode_array(v, buf, |e, b| e.encode_nested(b, ctx, nested))
            }
            ArrayValue::Variant(v) => {
                codec::encode_array(v, buf, |e, b| e.encode_nested(b, ctx, nested))
            }
            ArrayValue::DiagnosticInfo(v) => {
                codec::encode_array(v, buf, |e, b| e.encode(b, ctx.limits))
            }
        }
    }

    fn decode(buf: &mut Buffer, ctx: &CodecCtx, id: u8, nested: u32) -> Result<Self> {
        let limits = ctx.limits;
        Ok(match id {
            builtin_id::BOOLEAN => {
                ArrayValue::Boolean(codec::decode_array(buf, limits, builtin::decode_bool)?)
            }
            builtin_id::SBYTE => {
                ArrayValue::SByte(codec::decode_array(buf, limits, builtin::decode_i8)?)
            }
            builtin_id::BYTE => {
                ArrayValue::Byte(codec::decode_array(buf, limits, builtin::decode_u8)?)
            }
            builtin_id::INT16 => {
                ArrayValue::Int16(codec::decode_array(buf, limits, builtin::decode_i16)?)
            }
            builtin_id::UINT16 => {
                ArrayValue::UInt16(codec::decode_array(buf, limits, builtin::decode_u16)?)
            }
            builtin_id::INT32 => {
                ArrayValue::Int32(codec::decode_array(buf, limits, builtin::decode_i32)?)
            }
            builtin_id::UINT32 => {
                ArrayValue::UInt32(codec::decode_array(buf, limits, builtin::decode_u32)?)
            }
            builtin_id::INT64 => {
                ArrayValue::Int64(codec::decode_array(buf, limits, builtin::decode_i64)?)
            }
            builtin_id::UINT64 => {
                ArrayValue::UInt64(codec::decode_array(buf, limits, builtin::decode_u64)?)
            }
            builtin_id::FLOAT => {
                ArrayValue::Float(codec::decode_array(buf, limits, builtin::decode_f32)?)
            }
            builtin_id::DOUBLE => {
                ArrayValue::Double(codec::decode_array(buf, limits, builtin::decode_f64)?)
            }
            builtin_id::STRING => ArrayValue::String(codec::decode_array(buf, limits, |b| {
                builtin::decode_string(b, limits)
            })?),
            builtin_id::DATE_TIME => {
                ArrayValue::DateTime(codec::decode_array(buf, limits, builtin::decode_datetime)?)
            }
            builtin_id::GUID => ArrayValue::Guid(codec::decode_array(buf, limits, Guid::decode)?),
            builtin_id::BYTE_STRING => {
                ArrayValue::ByteString(codec::decode_array(buf, limits, |b| {
                    builtin::decode_byte_string(b, limits)
                })?)
            }
            builtin_id::XML_ELEMENT => {
                ArrayValue::XmlElement(codec::decode_array(buf, limits, |b| {
                    builtin::decode_byte_string(b, limits)
                })?)
            }
            builtin_id::NODE_ID => ArrayValue::NodeId(codec::decode_array(buf, limits, |b| {
                NodeId::decode(b, limits)
            })?),
            builtin_id::EXPANDED_NODE_ID => {
                ArrayValue::ExpandedNodeId(codec::decode_array(buf, limits, |b| {
                    ExpandedNodeId::decode(b, limits)
                })?)
            }
            builtin_id::STATUS_CODE => {
                ArrayValue::StatusCode(codec::decode_array(buf, limits, |b| {
                    Ok(StatusCode(builtin::decode_u32(b)?))
                })?)
            }
            builtin_id::QUALIFIED_NAME => {
                ArrayValue::QualifiedName(codec::decode_array(buf, limits, |b| {
                    QualifiedName::decode(b, limits)
                })?)
            }
            builtin_id::LOCALIZED_TEXT => {
                ArrayValue::LocalizedText(codec::decode_array(buf, limits, |b| {
                    LocalizedText::decode(b, limits)
                })?)
            }
            builtin_id::EXTENSION_OBJECT => {
                ArrayValue::ExtensionObject(codec::decode_array(buf, limits, |b| {
                    ExtensionObject::decode(b, ctx)
                })?)
            }
            builtin_id::DATA_VALUE => {
                ArrayValue::DataValue(codec::decode_array(buf, limits, |b| {
                    DataValue::decode_nested(b, ctx, nested)
                })?)
            }
            builtin_id::VARIANT => ArrayValue::Variant(codec::decode_array(buf, limits, |b| {
                Variant::decode_nested(b, ctx, nested)
            })?),
            builtin_id::DIAGNOSTIC_INFO => {
                ArrayValue::DiagnosticInfo(codec::decode_array(buf, limits, |b| {
                    DiagnosticInfo::decode(b, limits)
                })?)
            }
            _ => return Err(Status::EncodingError),
        })
    }
}

impl Variant {
    /// Builtin type id carried in the encoding byte
    pub fn builtin_type_id(&self) -> u8 {
        match self {
            Variant::Null => builtin_id::NULL,
            Variant::Scalar(v) => v.builtin_type_id(),
            Variant::Array(v) => v.builtin_type_id(),
            Variant::Matrix(m) => m.elements.builtin_type_id(),
        }
    }

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.encode_nested(buf, ctx, 0)
    }

    fn encode_nested(&self, buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<()> {
        if nested > ctx.limits.max_variant_nested_level {
            return Err(Status::EncodingError);
        }
        let nested = nested + 1;

        let mut encoding = self.builtin_type_id();
        match self {
            Variant::Array(_) => encoding |= FLAG_ARRAY_VALUE,
            Variant::Matrix(_) => encoding |= FLAG_ARRAY_VALUE | FLAG_ARRAY_DIMENSIONS,
            _ => {}
        }
        builtin::encode_u8(encoding, buf)?;

        match self {
            Variant::Null => Ok(()),
            Variant::Scalar(value) => value.encode(buf, ctx, nested),
            Variant::Array(array) => array.encode(buf, ctx, nested),
            Variant::Matrix(matrix) => {
                let mut product: i64 = if matrix.dimensions.is_empty() { 0 } else { 1 };
                for extent in &matrix.dimensions {
                    if *extent <= 0 || product * i64::from(*extent) > i64::from(i32::MAX) {
                        return Err(Status::EncodingError);
                    }
                    product *= i64::from(*extent);
                }
                if product != matrix.elements.len() as i64 {
                    return Err(Status::EncodingError);
                }
                matrix.elements.encode(buf, ctx, nested)?;
                builtin::encode_i32(matrix.dimensions.len() as i32, buf)?;
                for extent in &matrix.dimensions {
                    builtin::encode_i32(*extent, buf)?;
                }
                Ok(())
            }
        }
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Self::decode_nested(buf, ctx, 0)
    }

    fn decode_nested(buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<Self> {
        if nested > ctx.limits.max_variant_nested_level {
            return Err(Status::OutOfMemory);
        }
        let nested = nested + 1;

        let encoding = builtin::decode_u8(buf)?;
        let id = encoding & 0x3F;
        let has_array = encoding & FLAG_ARRAY_VALUE != 0;
        let has_dimensions = encoding & FLAG_ARRAY_DIMENSIONS != 0;

        if !has_array {
            if has_dimensions {
                return Err(Status::InvalidParameters);
            }
            let value = ScalarValue::decode(buf, ctx, id, nested)?;
            return Ok(match value {
                ScalarValue::Null => Variant::Null,
                other => Variant::Scalar(other),
            });
        }

        let elements = ArrayValue::decode(buf, ctx, id, nested)?;
        if !has_dimensions {
            return Ok(Variant::Array(elements));
        }

        let flat_len = elements.len() as i64;
        let dimension_count = builtin::decode_i32(buf)?;
        if dimension_count < 0 || dimension_count > ctx.limits.max_array_length {
            return Err(Status::OutOfMemory);
        }
        let mut dimensions = Vec::with_capacity(dimension_count as usize);
        let mut product: i64 = if dimension_count == 0 { 0 } else { 1 };
        for _ in 0..dimension_count {
            let extent = builtin::decode_i32(buf)?;
            if extent <= 0 {
                return Err(Status::EncodingError);
            }
            product *= i64::from(extent);
            if product > flat_len {
                return Err(Status::EncodingError);
            }
            dimensions.push(extent);
        }
        if product != flat_len {
            return Err(Status::EncodingError);
        }
        Ok(Variant::Matrix(Matrix {
            elements,
            dimensions,
        }))
    }
}

const DATA_VALUE_HAS_VALUE: u8 = 0x01;
const DATA_VALUE_HAS_STATUS: u8 = 0x02;
const DATA_VALUE_HAS_SOURCE_TIMESTAMP: u8 = 0x04;
const DATA_VALUE_HAS_SERVER_TIMESTAMP: u8 = 0x08;
const DATA_VALUE_HAS_SOURCE_PICOSECONDS: u8 = 0x10;
const DATA_VALUE_HAS_SERVER_PICOSECONDS: u8 = 0x20;

/// Variant plus quality and timestamps. Absent wire fields decode to the
/// defaults: null value, Good status, zero timestamps.
#[derive(Debug, Default, PartialEq)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: DateTime,
    pub source_picoseconds: u16,
    pub server_timestamp: DateTime,
    pub server_picoseconds: u16,
}

impl DataValue {
    pub fn from_variant(value: Variant) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    fn mask(&self) -> u8 {
        let mut mask = 0;
        if !matches!(self.value, Variant::Null | Variant::Scalar(ScalarValue::Null)) {
            mask |= DATA_VALUE_HAS_VALUE;
        }
        if !self.status.is_good() {
            mask |= DATA_VALUE_HAS_STATUS;
        }
        if self.source_timestamp > 0 {
            mask |= DATA_VALUE_HAS_SOURCE_TIMESTAMP;
        }
        if self.source_picoseconds > 0 {
            mask |= DATA_VALUE_HAS_SOURCE_PICOSECONDS;
        }
        if self.server_timestamp > 0 {
            mask |= DATA_VALUE_HAS_SERVER_TIMESTAMP;
        }
        if self.server_picoseconds > 0 {
            mask |= DATA_VALUE_HAS_SERVER_PICOSECONDS;
        }
        mask
    }

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.encode_nested(buf, ctx, 0)
    }

    pub(crate) fn encode_nested(&self, buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<()> {
        let mask = self.mask();
        builtin::encode_u8(mask, buf)?;
        if mask & DATA_VALUE_HAS_VALUE != 0 {
            self.value.encode_nested(buf, ctx, nested)?;
        }
        if mask & DATA_VALUE_HAS_STATUS != 0 {
            builtin::encode_u32(self.status.0, buf)?;
        }
        if mask & DATA_VALUE_HAS_SOURCE_TIMESTAMP != 0 {
            builtin::encode_datetime(self.source_timestamp, buf)?;
        }
        if mask & DATA_VALUE_HAS_SOURCE_PICOSECONDS != 0 {
            builtin::encode_u16(self.source_picoseconds, buf)?;
        }
        if mask & DATA_VALUE_HAS_SERVER_TIMESTAMP != 0 {
            builtin::encode_datetime(self.server_timestamp, buf)?;
        }
        if mask & DATA_VALUE_HAS_SERVER_PICOSECONDS != 0 {
            builtin::encode_u16(self.server_picoseconds, buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Self::decode_nested(buf, ctx, 0)
    }

    pub(crate) fn decode_nested(buf: &mut Buffer, ctx: &CodecCtx, nested: u32) -> Result<Self> {
        let mask = builtin::decode_u8(buf)?;
        let value = if mask & DATA_VALUE_HAS_VALUE != 0 {
            Variant::decode_nested(buf, ctx, nested)?
        } else {
            Variant::Null
        };
        let status = if mask & DATA_VALUE_HAS_STATUS != 0 {
            StatusCode(builtin::decode_u32(buf)?)
        } else {
            StatusCode::GOOD
        };
        let source_timestamp = if mask & DATA_VALUE_HAS_SOURCE_TIMESTAMP != 0 {
            builtin::decode_datetime(buf)?
        } else {
            0
        };
        let source_picoseconds = if mask & DATA_VALUE_HAS_SOURCE_PICOSECONDS != 0 {
            builtin::decode_u16(buf)?
        } else {
            0
        };
        let server_timestamp = if mask & DATA_VALUE_HAS_SERVER_TIMESTAMP != 0 {
            builtin::decode_datetime(buf)?
        } else {
            0
        };
        let server_picoseconds = if mask & DATA_VALUE_HAS_SERVER_PICOSECONDS != 0 {
            builtin::decode_u16(buf)?
        } else {
            0
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}
