mod array_value;
mod bytes_value;
mod json;
mod map_value;
mod ordering;
mod value;

pub use array_value::ArrayValue;
pub use bytes_value::BytesValue;
pub use json::{from_json_value, to_json_value};
pub use map_value::MapValue;
pub use ordering::{compare_same_kind, compare_values, values_equal};
pub use value::{FirestoreValue, SentinelValue, ValueKind};
