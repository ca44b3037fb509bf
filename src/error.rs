//! Error types for the sanitization daemon.

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, WipeError>;

/// Errors that can occur while discovering, sanitizing, or certifying
/// devices.
#[derive(Debug, Error)]
pub enum WipeError {
    /// Process is not running as root
    #[error("root privileges are required")]
    Privilege,

    /// Device enumeration failed
    #[error("device discovery failed: {0}")]
    Discovery(String),

    /// Device or wipe method is not known
    #[error("{0} not found")]
    NotFound(String),

    /// Safety interlock refused the operation (mounted, frozen, OS disk,
    /// or method not permitted for the device class)
    #[error("refusing to proceed: {0}")]
    SafetyRefusal(String),

    /// An invoked system utility exited non-zero; carries its combined
    /// stdout/stderr
    #[error("{tool} failed: {output}")]
    ExternalTool { tool: String, output: String },

    /// Open/seek/write on the device node failed
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Classifier pipeline failed; always downgraded to a warning
    #[error("inference failed: {0}")]
    Inference(String),

    /// Signing key could not be loaded or the signature failed
    #[error("certificate signing failed: {0}")]
    Signing(String),

    /// Subprocess exceeded its upper bound
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// The job was cancelled
    #[error("wipe aborted")]
    Aborted,

    /// A wipe is already running for this device identity
    #[error("a wipe is already active for {0}")]
    JobActive(String),
}
