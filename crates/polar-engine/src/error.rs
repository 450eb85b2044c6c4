//! Error taxonomy of the compute job.

use std::path::PathBuf;

use thiserror::Error;

use crate::device::MemoryProperties;

/// Coarse error category, one per failure domain of the job.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    DeviceEnumeration,
    Resource,
    ShaderLoad,
    Submission,
    Io,
}

/// Every failure the job can report. All of them are fatal for the run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no adapters found")]
    NoAdapters,

    #[error("no compatible adapter among {inspected} candidate(s)")]
    NoCompatibleDevice { inspected: usize },

    #[error("no memory type with bits={type_bits:#x} satisfies {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: MemoryProperties,
    },

    #[error("memory type {memory_type} ({flags:?}) is not host-visible and cannot be mapped")]
    InvalidMapping {
        memory_type: u32,
        flags: MemoryProperties,
    },

    #[error("resource error: {0}")]
    Resource(String),

    #[error("failed to load kernel bytecode from {path}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("binding layout does not match the kernel interface: {0}")]
    BindingMismatch(String),

    #[error("submission error: {0}")]
    Submission(String),

    #[error("fence wait failed: {0}")]
    FenceWait(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Configuration(_) => ErrorKind::Configuration,
            JobError::NoAdapters | JobError::NoCompatibleDevice { .. } => {
                ErrorKind::DeviceEnumeration
            }
            JobError::NoSuitableMemoryType { .. }
            | JobError::InvalidMapping { .. }
            | JobError::Resource(_) => ErrorKind::Resource,
            JobError::ShaderLoad { .. } => ErrorKind::ShaderLoad,
            JobError::BindingMismatch(_) | JobError::Submission(_) | JobError::FenceWait(_) => {
                ErrorKind::Submission
            }
            JobError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        JobError::Configuration(msg.into())
    }

    pub(crate) fn resource(msg: impl Into<String>) -> Self {
        JobError::Resource(msg.into())
    }

    pub(crate) fn submission(msg: impl Into<String>) -> Self {
        JobError::Submission(msg.into())
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, JobError>;
