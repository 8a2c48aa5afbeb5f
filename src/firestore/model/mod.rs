mod document_key;
mod field_path;
mod resource_path;
mod timestamp;

pub use document_key::DocumentKey;
pub(crate) use field_path::from_wire_name;
pub use field_path::{to_wire_name, FieldPath, IntoFieldPath};
pub use resource_path::ResourcePath;
pub use timestamp::Timestamp;
