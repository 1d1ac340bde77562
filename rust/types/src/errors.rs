use thiserror::Error;

use segflow_error::{ChromaError, ErrorCodes};

use crate::ids::{PlanId, SegmentId};

/// Errors raised by the Segment Meta Store (C1). `StaleMeta` and
/// `StorageUnavailable` are named explicitly in spec.md §4.1.
#[derive(Error, Debug)]
pub enum MetaStoreError {
    #[error("segment {0} not found")]
    NotFound(SegmentId),
    #[error("segment {0} has been dropped")]
    StaleMeta(SegmentId),
    #[error("compaction plan {0} not found")]
    PlanNotFound(PlanId),
    #[error("meta store unavailable: {0}")]
    StorageUnavailable(String),
}

impl ChromaError for MetaStoreError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetaStoreError::NotFound(_) => ErrorCodes::NotFound,
            MetaStoreError::StaleMeta(_) => ErrorCodes::FailedPrecondition,
            MetaStoreError::PlanNotFound(_) => ErrorCodes::NotFound,
            MetaStoreError::StorageUnavailable(_) => ErrorCodes::Unavailable,
        }
    }
}

/// Errors raised by the ID/Timestamp Allocator (C2).
#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("allocator unavailable: {0}")]
    AllocatorUnavailable(String),
}

impl ChromaError for AllocatorError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Unavailable
    }
}

/// Errors raised by the Compaction Trigger/Handler (C6).
#[derive(Error, Debug)]
pub enum CompactionError {
    #[error("segment {0} already has an in-flight compaction plan")]
    ConflictingCompaction(SegmentId),
    #[error("compaction plan {0} not found")]
    PlanNotFound(crate::ids::PlanId),
    #[error("compaction plan {0} is already in a terminal state")]
    IllegalTransition(crate::ids::PlanId),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),
}

impl ChromaError for CompactionError {
    fn code(&self) -> ErrorCodes {
        match self {
            CompactionError::ConflictingCompaction(_) => ErrorCodes::Aborted,
            CompactionError::PlanNotFound(_) => ErrorCodes::NotFound,
            CompactionError::IllegalTransition(_) => ErrorCodes::FailedPrecondition,
            CompactionError::Allocator(e) => e.code(),
            CompactionError::MetaStore(e) => e.code(),
        }
    }
}

/// Errors raised by the Segment Allocator (C4).
#[derive(Error, Debug)]
pub enum AllocSegmentError {
    #[error("unknown collection")]
    NoCollection,
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    #[error(transparent)]
    MetaStore(#[from] MetaStoreError),
}

impl ChromaError for AllocSegmentError {
    fn code(&self) -> ErrorCodes {
        match self {
            AllocSegmentError::NoCollection => ErrorCodes::NotFound,
            AllocSegmentError::Allocator(e) => e.code(),
            AllocSegmentError::MetaStore(e) => e.code(),
        }
    }
}

/// The named status reasons every RPC response in spec.md §6 may carry,
/// alongside the generic `UnexpectedError` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReason {
    ServerNotServing,
    SegmentNotFound,
    ChannelNotWatched,
    CompactionDisabled,
    AllocFailed,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::ServerNotServing => "serverNotServing",
            StatusReason::SegmentNotFound => "segmentNotFound",
            StatusReason::ChannelNotWatched => "channel-not-watched",
            StatusReason::CompactionDisabled => "compactionDisabled",
            StatusReason::AllocFailed => "allocFailed",
        }
    }

    /// Inverse of `as_str`, used by RPC callers that need to classify a
    /// response's typed reason (e.g. the DN distinguishing a stale-owner
    /// rejection from a fatal error on `SaveBinlogPaths`).
    pub fn parse(s: &str) -> Option<StatusReason> {
        match s {
            "serverNotServing" => Some(StatusReason::ServerNotServing),
            "segmentNotFound" => Some(StatusReason::SegmentNotFound),
            "channel-not-watched" => Some(StatusReason::ChannelNotWatched),
            "compactionDisabled" => Some(StatusReason::CompactionDisabled),
            "allocFailed" => Some(StatusReason::AllocFailed),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("{reason}: {message}")]
pub struct RpcError {
    pub reason: StatusReason,
    pub message: String,
}

impl RpcError {
    pub fn new(reason: StatusReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ChromaError for RpcError {
    fn code(&self) -> ErrorCodes {
        match self.reason {
            StatusReason::ServerNotServing => ErrorCodes::Unavailable,
            StatusReason::SegmentNotFound => ErrorCodes::NotFound,
            StatusReason::ChannelNotWatched => ErrorCodes::FailedPrecondition,
            StatusReason::CompactionDisabled => ErrorCodes::FailedPrecondition,
            StatusReason::AllocFailed => ErrorCodes::Internal,
        }
    }
}
