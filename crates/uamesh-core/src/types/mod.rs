//! Structured OPC UA types and their wire codec

pub mod diagnostic;
pub mod extension;
pub mod guid;
pub mod nodeid;
pub mod qualified;
pub mod string;
pub mod variant;

pub use diagnostic::DiagnosticInfo;
pub use extension::{ExtensionObject, ExtensionObjectBody};
pub use guid::Guid;
pub use nodeid::{ExpandedNodeId, Identifier, NodeId};
pub use qualified::{LocalizedText, QualifiedName};
pub use string::{ByteString, StatusCode, UaString, XmlElement};
pub use variant::{ArrayValue, DataValue, Matrix, Variant};
