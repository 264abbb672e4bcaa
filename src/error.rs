//! Bridge error types
//!
//! Provides a unified error type hierarchy for both façades.
//!
//! # Design
//! Uses thiserror for ergonomic error definitions. All errors implement
//! std::error::Error and can be converted to BridgeError via From trait.
//! Every error normalizes into a JSON record with at least a `message`
//! field and, where the backend supplied one, a machine-readable `code`.

use thiserror::Error;

/// Top-level bridge error type
///
/// Wraps the façade-specific error types (Auth, Database) into a unified
/// type. Supports conversion from all module-specific errors via `From`.
///
/// # Example
/// ```
/// use firebase_bridge::{BridgeError, AuthError};
///
/// let err: BridgeError = AuthError::InvalidEmail.into();
/// ```
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Authentication-related errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Realtime Database errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Network/HTTP errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A bridge request named a method this layer does not expose
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// A bridge request carried arguments of the wrong shape
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Authentication errors
///
/// Maps Identity Toolkit error codes to Rust enum variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Email address is invalid
    #[error("Invalid email address")]
    InvalidEmail,

    /// Password is invalid
    #[error("Invalid password")]
    InvalidPassword,

    /// Email already in use by another account
    #[error("Email already in use")]
    EmailAlreadyInUse,

    /// User not found
    #[error("User not found")]
    UserNotFound,

    /// Wrong password
    #[error("Wrong password")]
    WrongPassword,

    /// User account has been disabled
    #[error("User account disabled")]
    UserDisabled,

    /// Too many failed attempts
    #[error("Too many requests, try again later")]
    TooManyRequests,

    /// Operation not allowed (e.g., provider disabled)
    #[error("Operation not allowed")]
    OperationNotAllowed,

    /// Invalid credential
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Invalid phone verification code
    #[error("Invalid verification code")]
    InvalidVerificationCode,

    /// Invalid or expired phone verification session
    #[error("Invalid verification session")]
    InvalidVerificationSession,

    /// User token has expired
    #[error("User token expired")]
    UserTokenExpired,

    /// Invalid user token
    #[error("Invalid user token")]
    InvalidUserToken,

    /// Network error
    #[error("Network error: {0}")]
    NetworkRequestFailed(String),

    /// No signed-in user where one is required
    ///
    /// This is the caller-context error of the auth façade: it is reported
    /// before any backend call is made.
    #[error("User is not authorized")]
    NoSignedInUser,

    /// Requires recent login
    #[error("This operation requires recent authentication")]
    RequiresRecentLogin,

    /// Reauthentication resolved to a different account
    #[error("Credential belongs to a different user")]
    UserMismatch,

    /// Invalid API key
    #[error("Invalid API key")]
    InvalidApiKey,

    /// API key not configured
    #[error("API key not configured")]
    ApiKeyNotConfigured,

    /// Unknown error with backend code
    #[error("Auth error: {0}")]
    Unknown(String),
}

/// Realtime Database errors
///
/// Maps database REST statuses and stream-cancellation reasons to Rust
/// enum variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// The security rules rejected the operation
    #[error("Permission denied")]
    PermissionDenied,

    /// The listen credential was revoked mid-stream
    #[error("Authentication credential revoked")]
    AuthRevoked,

    /// The named database instance was never configured
    #[error("Database instance not configured: {0}")]
    InstanceNotConfigured(String),

    /// Malformed query descriptor, rejected before any backend call
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Malformed value for a write operation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Service unavailable
    #[error("Service unavailable")]
    Unavailable,

    /// Connection or network error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Unknown error with backend status
    #[error("Database error: {0}")]
    Unknown(String),
}

impl BridgeError {
    /// Create an internal error from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid-arguments error from a string
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Machine-readable code for this error, when one exists
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Auth(e) => e.code(),
            Self::Database(e) => Some(e.code()),
            Self::UnknownMethod(_) => Some("UNKNOWN_METHOD"),
            Self::InvalidArguments(_) => Some("INVALID_ARGUMENTS"),
            _ => None,
        }
    }

    /// Normalize into the caller-facing error record
    ///
    /// Always contains `message`; contains `code` whenever the backend (or
    /// this layer) supplied a machine-readable code.
    pub fn to_error_value(&self) -> serde_json::Value {
        let mut record = serde_json::Map::new();
        record.insert(
            "message".to_string(),
            serde_json::Value::String(self.to_string()),
        );
        if let Some(code) = self.code() {
            record.insert(
                "code".to_string(),
                serde_json::Value::String(code.to_string()),
            );
        }
        serde_json::Value::Object(record)
    }

    /// Check if error indicates authentication is required
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::NoSignedInUser)
                | Self::Auth(AuthError::RequiresRecentLogin)
                | Self::Auth(AuthError::UserTokenExpired)
                | Self::Auth(AuthError::InvalidUserToken)
                | Self::Database(DatabaseError::PermissionDenied)
                | Self::Database(DatabaseError::AuthRevoked)
        )
    }
}

impl AuthError {
    /// Create from an Identity Toolkit error code
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "EMAIL_NOT_FOUND" => Self::UserNotFound,
            "INVALID_PASSWORD" => Self::WrongPassword,
            "INVALID_LOGIN_CREDENTIALS" => Self::WrongPassword,
            "USER_DISABLED" => Self::UserDisabled,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "EMAIL_EXISTS" => Self::EmailAlreadyInUse,
            "OPERATION_NOT_ALLOWED" => Self::OperationNotAllowed,
            "INVALID_EMAIL" => Self::InvalidEmail,
            "WEAK_PASSWORD" => Self::InvalidPassword,
            "INVALID_ID_TOKEN" => Self::InvalidUserToken,
            "TOKEN_EXPIRED" => Self::UserTokenExpired,
            "INVALID_API_KEY" => Self::InvalidApiKey,
            "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => Self::RequiresRecentLogin,
            "INVALID_CODE" => Self::InvalidVerificationCode,
            "INVALID_SESSION_INFO" => Self::InvalidVerificationSession,
            "SESSION_EXPIRED" => Self::InvalidVerificationSession,
            "USER_NOT_FOUND" => Self::UserNotFound,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Machine-readable code for the caller-facing error record
    ///
    /// The inverse of [`from_error_code`](Self::from_error_code) where a
    /// stable code exists; caller-context errors have codes of their own.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::InvalidEmail => Some("INVALID_EMAIL"),
            Self::InvalidPassword => Some("WEAK_PASSWORD"),
            Self::EmailAlreadyInUse => Some("EMAIL_EXISTS"),
            Self::UserNotFound => Some("EMAIL_NOT_FOUND"),
            Self::WrongPassword => Some("INVALID_PASSWORD"),
            Self::UserDisabled => Some("USER_DISABLED"),
            Self::TooManyRequests => Some("TOO_MANY_ATTEMPTS_TRY_LATER"),
            Self::OperationNotAllowed => Some("OPERATION_NOT_ALLOWED"),
            Self::InvalidCredential(_) => Some("INVALID_CREDENTIAL"),
            Self::InvalidVerificationCode => Some("INVALID_CODE"),
            Self::InvalidVerificationSession => Some("INVALID_SESSION_INFO"),
            Self::UserTokenExpired => Some("TOKEN_EXPIRED"),
            Self::InvalidUserToken => Some("INVALID_ID_TOKEN"),
            Self::NoSignedInUser => Some("NO_SIGNED_IN_USER"),
            Self::RequiresRecentLogin => Some("CREDENTIAL_TOO_OLD_LOGIN_AGAIN"),
            Self::UserMismatch => Some("USER_MISMATCH"),
            Self::InvalidApiKey => Some("INVALID_API_KEY"),
            Self::ApiKeyNotConfigured => Some("API_KEY_NOT_CONFIGURED"),
            Self::Unknown(code) => Some(code.as_str()),
            Self::NetworkRequestFailed(_) => None,
        }
    }
}

impl DatabaseError {
    /// Create from a database REST response status and error body
    pub fn from_response(status: u16, reason: &str) -> Self {
        match status {
            401 | 403 => Self::PermissionDenied,
            400 => Self::InvalidData(reason.to_string()),
            503 => Self::Unavailable,
            _ => Self::Unknown(reason.to_string()),
        }
    }

    /// Create from a stream-cancellation event name
    pub fn from_stream_event(event: &str) -> Self {
        match event {
            "cancel" => Self::PermissionDenied,
            "auth_revoked" => Self::AuthRevoked,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Machine-readable code for the caller-facing error record
    pub fn code(&self) -> &str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AuthRevoked => "AUTH_REVOKED",
            Self::InstanceNotConfigured(_) => "INSTANCE_NOT_CONFIGURED",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::Unavailable => "UNAVAILABLE",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Internal(_) => "INTERNAL",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_into_bridge_error() {
        let auth_err = AuthError::InvalidEmail;
        let bridge_err: BridgeError = auth_err.into();

        assert!(matches!(bridge_err, BridgeError::Auth(AuthError::InvalidEmail)));
    }

    #[test]
    fn test_database_error_into_bridge_error() {
        let db_err = DatabaseError::PermissionDenied;
        let bridge_err: BridgeError = db_err.into();

        assert!(matches!(
            bridge_err,
            BridgeError::Database(DatabaseError::PermissionDenied)
        ));
    }

    #[test]
    fn test_auth_error_from_code() {
        assert_eq!(AuthError::from_error_code("EMAIL_NOT_FOUND"), AuthError::UserNotFound);
        assert_eq!(AuthError::from_error_code("INVALID_EMAIL"), AuthError::InvalidEmail);
        assert_eq!(AuthError::from_error_code("WEAK_PASSWORD"), AuthError::InvalidPassword);
        assert_eq!(
            AuthError::from_error_code("INVALID_SESSION_INFO"),
            AuthError::InvalidVerificationSession
        );
    }

    #[test]
    fn test_auth_error_code_round_trip() {
        let err = AuthError::from_error_code("TOO_MANY_ATTEMPTS_TRY_LATER");
        assert_eq!(err.code(), Some("TOO_MANY_ATTEMPTS_TRY_LATER"));
    }

    #[test]
    fn test_unrecognized_code_is_preserved() {
        let err = AuthError::from_error_code("QUOTA_EXCEEDED");
        assert_eq!(err, AuthError::Unknown("QUOTA_EXCEEDED".to_string()));
        assert_eq!(err.code(), Some("QUOTA_EXCEEDED"));
    }

    #[test]
    fn test_database_error_from_response() {
        assert_eq!(
            DatabaseError::from_response(401, "Permission denied"),
            DatabaseError::PermissionDenied
        );
        assert_eq!(
            DatabaseError::from_response(503, "unavailable"),
            DatabaseError::Unavailable
        );
    }

    #[test]
    fn test_database_error_from_stream_event() {
        assert_eq!(DatabaseError::from_stream_event("cancel"), DatabaseError::PermissionDenied);
        assert_eq!(DatabaseError::from_stream_event("auth_revoked"), DatabaseError::AuthRevoked);
    }

    #[test]
    fn test_error_record_has_message_and_code() {
        let err: BridgeError = AuthError::NoSignedInUser.into();
        let record = err.to_error_value();

        assert_eq!(record["message"], "Auth error: User is not authorized");
        assert_eq!(record["code"], "NO_SIGNED_IN_USER");
    }

    #[test]
    fn test_error_record_without_code() {
        let err = BridgeError::Internal("boom".to_string());
        let record = err.to_error_value();

        assert_eq!(record["message"], "Internal error: boom");
        assert!(record.get("code").is_none());
    }

    #[test]
    fn test_requires_auth() {
        assert!(BridgeError::Auth(AuthError::NoSignedInUser).requires_auth());
        assert!(BridgeError::Database(DatabaseError::PermissionDenied).requires_auth());
        assert!(!BridgeError::Auth(AuthError::InvalidEmail).requires_auth());
    }
}
