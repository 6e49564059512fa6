//! Encodeable-type descriptors and registry
//!
//! A descriptor ties a numeric TypeId / BinaryEncodingTypeId to the
//! functions that build and serialize the corresponding structured type.
//! The registry is the decoder's only source of truth for ExtensionObject
//! bodies and message bodies.

use std::any::Any;
use std::fmt;

use crate::buffer::Buffer;
use crate::codec::CodecCtx;
use crate::status::Result;

/// Builds a value of the described type from the wire
pub type DecodeFn = fn(&mut Buffer, &CodecCtx) -> Result<Box<dyn Encodeable>>;

/// Static description of one structured type
pub struct EncodeableType {
    pub name: &'static str,
    pub type_id: u32,
    pub binary_encoding_id: u32,
    pub xml_encoding_id: u32,
    /// None means the default OPC UA namespace
    pub namespace_uri: Option<&'static str>,
    pub decode: DecodeFn,
}

impl fmt::Debug for EncodeableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeableType")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .field("binary_encoding_id", &self.binary_encoding_id)
            .finish()
    }
}

impl PartialEq for EncodeableType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.namespace_uri == other.namespace_uri
    }
}

impl Eq for EncodeableType {}

/// Value of a registered structured type
pub trait Encodeable: fmt::Debug + Send + Sync {
    /// Descriptor of the concrete type
    fn type_desc(&self) -> &'static EncodeableType;

    /// Serialize the body, without any type id prefix
    fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    /// Value equality through the trait object
    fn eq_dyn(&self, other: &dyn Encodeable) -> bool;
}

impl dyn Encodeable {
    pub fn downcast_ref<T: Encodeable + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }
}

/// Table of known types, scanned by (namespace uri, numeric id). The id
/// matches either the TypeId or the BinaryEncodingTypeId.
#[derive(Default)]
pub struct EncodeableRegistry {
    entries: Vec<&'static EncodeableType>,
}

impl fmt::Debug for EncodeableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodeableRegistry({} types)", self.entries.len())
    }
}

impl EncodeableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the service message types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for desc in crate::messages::default_types().iter().copied() {
            registry.register(desc);
        }
        registry
    }

    pub fn register(&mut self, desc: &'static EncodeableType) {
        if !self.entries.iter().any(|e| *e == desc) {
            self.entries.push(desc);
        }
    }

    pub fn get(&self, namespace_uri: Option<&str>, id: u32) -> Option<&'static EncodeableType> {
        self.entries
            .iter()
            .copied()
            .find(|e| {
                e.namespace_uri == namespace_uri
                    && (e.type_id == id || e.binary_encoding_id == id)
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages;

    #[test]
    fn defaults_resolve_by_both_ids() {
        let registry = EncodeableRegistry::with_defaults();
        let by_type = registry
            .get(None, messages::OpenSecureChannelRequest::TYPE.type_id)
            .unwrap();
        let by_encoding = registry
            .get(
                None,
                messages::OpenSecureChannelRequest::TYPE.binary_encoding_id,
            )
            .unwrap();
        assert_eq!(by_type, by_encoding);
    }

    #[test]
    fn unknown_namespace_misses() {
        let registry = EncodeableRegistry::with_defaults();
        assert!(registry
            .get(Some("urn:other"), messages::ServiceFault::TYPE.type_id)
            .is_none());
    }
}
