//! Error types shared across the mockd workspace

/// Result type alias for mockd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error catalogue.
///
/// Protocol handlers translate these into their native failure shapes
/// (HTTP status, gRPC trailer, SOAP Fault, MQTT CONNACK code); the admin
/// API serializes them as `{error, message}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("bind failure: {message}")]
    BindFailure { message: String },

    #[error("protocol violation: {message}")]
    Protocol { message: String },

    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create an already-exists error
    pub fn already_exists<S: Into<String>>(message: S) -> Self {
        Self::AlreadyExists { message: message.into() }
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Create a bind-failure error
    pub fn bind<S: Into<String>>(message: S) -> Self {
        Self::BindFailure { message: message.into() }
    }

    /// Create a protocol-violation error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a resource-exhausted error
    pub fn exhausted<S: Into<String>>(message: S) -> Self {
        Self::ResourceExhausted { message: message.into() }
    }

    /// Create a transient error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient { message: message.into() }
    }

    /// Stable machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Unauthorized { .. } => "unauthorized",
            Self::BindFailure { .. } => "bind_failure",
            Self::Protocol { .. } => "protocol_violation",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Transient { .. } => "transient",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Json(_) | Self::Yaml(_) => "validation",
            Self::Regex(_) => "validation",
        }
    }

    /// HTTP status the admin boundary responds with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Json(_) | Self::Yaml(_) | Self::Regex(_) => 400,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::Unauthorized { .. } => 401,
            Self::ResourceExhausted { .. } => 429,
            Self::Cancelled => 499,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_catalogue() {
        assert_eq!(Error::validation("x").http_status(), 400);
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::already_exists("x").http_status(), 409);
        assert_eq!(Error::unauthorized("x").http_status(), 401);
        assert_eq!(Error::exhausted("x").http_status(), 429);
        assert_eq!(Error::bind("x").http_status(), 500);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::already_exists("dup").code(), "already_exists");
        assert_eq!(Error::protocol("bad envelope").code(), "protocol_violation");
    }
}
