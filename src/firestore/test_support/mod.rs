//! Fixtures shared by the unit tests.

mod bridge;
mod fixtures;

pub(crate) use bridge::RecordingBridge;
pub(crate) use fixtures::{document_record, fields, seeded_store};
