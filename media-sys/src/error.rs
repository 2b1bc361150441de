// SPDX-License-Identifier: GPL-3.0-only

use media_types::ModelError;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Wrong device type or state for the requested operation.
    #[error("{0}")]
    Precondition(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("{context}: {source}")]
    Annotated {
        context: String,
        #[source]
        source: Box<SysError>,
    },

    #[error("Failed to mount {target}: {source}")]
    Mount {
        target: String,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Passphrase: {0}")]
    Passphrase(String),
}

impl SysError {
    /// Wrap this error with the call site it surfaced from.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        Self::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
