//! Error taxonomy for the remuxing pipeline.
//!
//! Framing errors mean the bytes themselves are broken; structure errors
//! mean well-formed elements showed up somewhere they cannot legally live.
//! Both are fatal: the run aborts and whatever already reached the sink
//! stands as the (incomplete) result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("invalid element id at offset {offset}")]
    InvalidId { offset: u64 },
    #[error("invalid element size at offset {offset}")]
    InvalidSize { offset: u64 },
    #[error("unknown-size element {id:#x} is not a list")]
    UnknownSizeNonList { id: u32 },
    #[error("uint element {id:#x} has an oversized payload ({size} bytes)")]
    OversizedUint { id: u32, size: u64 },
    #[error(
        "child {id:#x} needs {needed} bytes but parent {parent:#x} has only {remaining} left"
    )]
    ChildExceedsParent {
        id: u32,
        parent: u32,
        needed: u64,
        remaining: u64,
    },
    #[error("element {id:#x} overran its declared size")]
    Overrun { id: u32 },
    #[error("stream truncated mid-element at offset {offset}")]
    TruncatedHeader { offset: u64 },
    #[error("stream ended inside element {id:#x} with a declared size")]
    TruncatedElement { id: u32 },
    #[error("parser already failed, stream abandoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("SimpleBlock outside of a Cluster")]
    BlockOutsideCluster,
    #[error("Timecode outside of a Cluster")]
    TimecodeOutsideCluster,
    #[error("{0} outside of a Segment")]
    OutsideSegment(&'static str),
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("SimpleBlock before the Cluster's Timecode")]
    MissingClusterTimecode,
    #[error("malformed SimpleBlock header")]
    MalformedBlock,
    #[error("block timecode offset {0} does not fit the output cluster")]
    BlockOffsetOutOfRange(i64),
}

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("malformed framing: {0}")]
    Framing(#[from] FramingError),
    #[error("structural violation: {0}")]
    Structure(#[from] StructureError),
    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}
