use crate::firestore::error::{
    cancelled, internal_error, invalid_argument, not_found, permission_denied, unavailable, unknown,
    FirestoreError,
};
use crate::firestore::remote::bridge::BridgeError;

/// Maps a bridge failure onto the closed error taxonomy.
///
/// Codes are matched case-insensitively in both gRPC style
/// (`PERMISSION_DENIED`) and kebab style (`permission-denied`). Anything
/// unrecognised becomes `Unknown` and keeps the bridge's code.
pub fn map_bridge_error(error: BridgeError) -> FirestoreError {
    let normalized = error.code.trim().to_ascii_lowercase().replace('_', "-");
    let normalized = normalized.strip_prefix("firestore/").unwrap_or(&normalized);
    let message = error.message;
    let mapped = match normalized {
        "invalid-argument" | "failed-precondition" | "out-of-range" | "already-exists" => {
            invalid_argument(message)
        }
        "not-found" => not_found(message),
        "permission-denied" | "unauthenticated" => permission_denied(message),
        "cancelled" => cancelled(message),
        "unavailable" | "deadline-exceeded" | "resource-exhausted" | "aborted" => unavailable(message),
        "internal" | "data-loss" => internal_error(message),
        _ => unknown(message),
    };
    mapped.with_backend_code(error.code)
}

impl From<BridgeError> for FirestoreError {
    fn from(error: BridgeError) -> Self {
        map_bridge_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::FirestoreErrorCode;

    #[test]
    fn maps_known_codes_in_either_style() {
        let denied = map_bridge_error(BridgeError::new("PERMISSION_DENIED", "rules"));
        assert_eq!(denied.code, FirestoreErrorCode::PermissionDenied);
        assert_eq!(denied.backend_code(), Some("PERMISSION_DENIED"));

        let missing = map_bridge_error(BridgeError::new("not-found", "gone"));
        assert_eq!(missing.code, FirestoreErrorCode::NotFound);

        let down = map_bridge_error(BridgeError::new("firestore/unavailable", "offline"));
        assert_eq!(down.code, FirestoreErrorCode::Unavailable);
    }

    #[test]
    fn unknown_codes_keep_the_backend_code() {
        let err = map_bridge_error(BridgeError::new("quota-melted", "boom"));
        assert_eq!(err.code, FirestoreErrorCode::Unknown);
        assert_eq!(err.backend_code(), Some("quota-melted"));
        assert_eq!(err.message(), "boom");
    }
}
