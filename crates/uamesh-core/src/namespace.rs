//! Namespace URI table
//!
//! Index 0 is always the default OPC UA namespace. URI comparison is
//! case-insensitive.

use crate::status::{Result, Status};

/// URI of namespace index 0
pub const OPCUA_NAMESPACE_URI: &str = "http://opcfoundation.org/UA/";

/// Index of the default namespace
pub const DEFAULT_NAMESPACE_INDEX: u16 = 0;

#[derive(Debug, Clone)]
pub struct NamespaceTable {
    uris: Vec<String>,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        Self {
            uris: vec![OPCUA_NAMESPACE_URI.to_owned()],
        }
    }
}

impl NamespaceTable {
    /// Register a URI, returning its index; an already-known URI keeps its
    /// existing index
    pub fn add(&mut self, uri: &str) -> Result<u16> {
        if let Ok(index) = self.get_index(Some(uri)) {
            return Ok(index);
        }
        if self.uris.len() > u16::MAX as usize {
            return Err(Status::OutOfMemory);
        }
        self.uris.push(uri.to_owned());
        Ok((self.uris.len() - 1) as u16)
    }

    pub fn get_name(&self, index: u16) -> Option<&str> {
        self.uris.get(index as usize).map(String::as_str)
    }

    /// Resolve a URI to its index. An absent URI resolves to the default
    /// namespace index.
    pub fn get_index(&self, uri: Option<&str>) -> Result<u16> {
        let Some(uri) = uri else {
            return Ok(DEFAULT_NAMESPACE_INDEX);
        };
        self.uris
            .iter()
            .position(|known| known.eq_ignore_ascii_case(uri))
            .map(|i| i as u16)
            .ok_or(Status::InvalidParameters)
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_is_index_zero() {
        let table = NamespaceTable::default();
        assert_eq!(table.get_name(0), Some(OPCUA_NAMESPACE_URI));
        assert_eq!(table.get_index(Some(OPCUA_NAMESPACE_URI)), Ok(0));
    }

    #[test]
    fn absent_uri_resolves_to_default() {
        let table = NamespaceTable::default();
        assert_eq!(table.get_index(None), Ok(DEFAULT_NAMESPACE_INDEX));
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let mut table = NamespaceTable::default();
        let index = table.add("urn:Demo:Boiler").unwrap();
        assert_eq!(table.get_index(Some("urn:demo:boiler")), Ok(index));
    }

    #[test]
    fn re_adding_keeps_index() {
        let mut table = NamespaceTable::default();
        let a = table.add("urn:a").unwrap();
        assert_eq!(table.add("urn:a").unwrap(), a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unknown_uri_is_rejected() {
        let table = NamespaceTable::default();
        assert_eq!(
            table.get_index(Some("urn:unknown")),
            Err(Status::InvalidParameters)
        );
    }
}
