//! # Recluster Core
//!
//! Incremental WebM cluster remuxing: a push-based EBML parser feeds a
//! demuxer client that re-buckets SimpleBlocks into output Clusters of a
//! caller-chosen minimum duration. One forward pass, no random access on
//! the input side.

// ============================================================================
// Wire Format
// ============================================================================
pub mod ebml;
pub mod webm;

// ============================================================================
// Pipeline
// ============================================================================
pub mod parser;
pub mod remux;
pub mod writer;

// ============================================================================
// Errors
// ============================================================================
pub mod error;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
