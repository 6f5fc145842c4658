use thiserror::Error;

/// ctrshim error types
#[derive(Error, Debug)]
pub enum ShimError {
    /// A required input was missing or empty
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced container or image is unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// The container id is already tracked
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resolving or fetching an image failed
    #[error("Failed to pull image {reference}: {message}")]
    ImagePull { reference: String, message: String },

    /// The image must be pulled before it can back a container
    #[error("Image {0} is not pulled")]
    ImageNotPulled(String),

    /// Rootfs materialization or unmount failed
    #[error("Rootfs error at {path}: {message}")]
    Rootfs { path: String, message: String },

    /// The execution backend failed
    #[error("Backend {op} failed for {id}: {message}")]
    Backend {
        op: String,
        id: String,
        message: String,
    },

    /// A container id does not follow the naming scheme
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShimError {
    /// Shorthand for a backend failure on `op` against `id`.
    pub fn backend(op: &str, id: &str, message: impl ToString) -> Self {
        ShimError::Backend {
            op: op.to_string(),
            id: id.to_string(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a rootfs failure at `path`.
    pub fn rootfs(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        ShimError::Rootfs {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Coarse classification for an outer transport to map onto its own
    /// status codes.
    pub fn code(&self) -> ErrorCode {
        match self {
            ShimError::InvalidArgument(_) | ShimError::MalformedIdentity(_) => {
                ErrorCode::InvalidArgument
            }
            ShimError::NotFound(_) => ErrorCode::NotFound,
            ShimError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            ShimError::ImageNotPulled(_) => ErrorCode::FailedPrecondition,
            ShimError::ImagePull { .. } | ShimError::Backend { .. } => ErrorCode::Unavailable,
            ShimError::Timeout(_) => ErrorCode::DeadlineExceeded,
            ShimError::Config(_) => ErrorCode::InvalidArgument,
            ShimError::Rootfs { .. } | ShimError::Io(_) | ShimError::Serialization(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// Transport-neutral error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Unavailable,
    DeadlineExceeded,
    Internal,
}

impl From<serde_json::Error> for ShimError {
    fn from(err: serde_json::Error) -> Self {
        ShimError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ShimError {
    fn from(err: serde_yaml::Error) -> Self {
        ShimError::Serialization(err.to_string())
    }
}

/// Result type alias for ctrshim operations
pub type Result<T> = std::result::Result<T, ShimError>;
