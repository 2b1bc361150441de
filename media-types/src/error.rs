// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for the device model and its documents
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid block device descriptor: {0}")]
    Descriptor(String),

    #[error("unknown block device type: {0:?}")]
    UnknownType(String),

    #[error("unknown block device state: {0:?}")]
    UnknownState(String),

    #[error("invalid size: {0:?}")]
    InvalidSize(String),

    #[error("{name}: Partition Sizes {children} larger than Device Size: {size}")]
    ChildrenTooLarge {
        name: String,
        children: u64,
        size: u64,
    },

    #[error("unsupported filesystem: {0:?}")]
    UnsupportedFilesystem(String),

    #[error("invalid layout document: {0}")]
    Layout(String),

    #[error("{0}")]
    Precondition(String),
}

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
