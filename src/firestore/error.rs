use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FirestoreErrorCode {
    /// Contract violation by the caller (bad path, misuse of a handle, ...).
    InvalidArgument,
    /// The query or predicate cannot be expressed for the backing store.
    InvalidPlan,
    NotFound,
    PermissionDenied,
    Cancelled,
    Unavailable,
    Internal,
    /// Opaque backend failure; the raw code is kept in `backend_code`.
    Unknown,
}

impl FirestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirestoreErrorCode::InvalidArgument => "firestore/invalid-argument",
            FirestoreErrorCode::InvalidPlan => "firestore/invalid-plan",
            FirestoreErrorCode::NotFound => "firestore/not-found",
            FirestoreErrorCode::PermissionDenied => "firestore/permission-denied",
            FirestoreErrorCode::Cancelled => "firestore/cancelled",
            FirestoreErrorCode::Unavailable => "firestore/unavailable",
            FirestoreErrorCode::Internal => "firestore/internal",
            FirestoreErrorCode::Unknown => "firestore/unknown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FirestoreError {
    pub code: FirestoreErrorCode,
    message: String,
    backend_code: Option<String>,
}

impl FirestoreError {
    pub fn new(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            backend_code: None,
        }
    }

    /// Attaches the raw code reported by the backing store.
    pub fn with_backend_code(mut self, backend_code: impl Into<String>) -> Self {
        self.backend_code = Some(backend_code.into());
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The code as reported by the backing store, when the error came from it.
    pub fn backend_code(&self) -> Option<&str> {
        self.backend_code.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == FirestoreErrorCode::Cancelled
    }
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.backend_code {
            Some(backend) => write!(f, "{} ({}, backend code {backend})", self.message, self.code_str()),
            None => write!(f, "{} ({})", self.message, self.code_str()),
        }
    }
}

impl Error for FirestoreError {}

pub type FirestoreResult<T> = Result<T, FirestoreError>;

pub fn invalid_argument(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidArgument, message)
}

pub fn invalid_plan(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidPlan, message)
}

pub fn internal_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Internal, message)
}

pub fn not_found(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::NotFound, message)
}

pub fn permission_denied(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::PermissionDenied, message)
}

pub fn cancelled(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Cancelled, message)
}

pub fn unavailable(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unavailable, message)
}

pub fn unknown(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unknown, message)
}
