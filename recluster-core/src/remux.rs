//! Cluster remuxer: the element handler that reshapes cluster boundaries.
//!
//! Input clusters and output clusters are deliberately not one-to-one.
//! Blocks stream into a pending output cluster whose base is the first
//! block's absolute timecode; the cluster is closed once its span reaches
//! the configured minimum duration, so output spans are bounded below by
//! the minimum and above only by how sparsely blocks arrive.

use crate::error::{RemuxError, StructureError};
use crate::parser::{ElementHandler, LeafValue};
use crate::webm;
use crate::writer::ElementSink;

/// Upper end of the accepted minimum-duration range. Enforced by callers
/// before construction; the remuxer assumes a valid value.
pub const MAX_CLUSTER_DURATION_MS: u64 = 30_000;

pub struct ClusterRemuxer<S: ElementSink> {
    sink: S,
    min_cluster_ms: u64,
    wrote_ebml_header: bool,
    wrote_info: bool,
    wrote_tracks: bool,
    in_segment: bool,
    in_cluster: bool,
    /// Base Timecode of the input cluster currently being read.
    input_base: Option<u64>,
    /// Base timecode of the open output cluster, `None` while no output
    /// cluster is open.
    output_base: Option<u64>,
}

impl<S: ElementSink> ClusterRemuxer<S> {
    pub fn new(sink: S, min_cluster_ms: u64) -> Self {
        debug_assert!(min_cluster_ms <= MAX_CLUSTER_DURATION_MS);
        Self {
            sink,
            min_cluster_ms,
            wrote_ebml_header: false,
            wrote_info: false,
            wrote_tracks: false,
            in_segment: false,
            in_cluster: false,
            input_base: None,
            output_base: None,
        }
    }

    /// Flush the sink. Called once after the parser has seen end of data;
    /// a failure here is fatal for the run.
    pub fn finish(&mut self) -> Result<(), RemuxError> {
        self.sink.finish()?;
        Ok(())
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn write_block(&mut self, payload: &[u8]) -> Result<(), RemuxError> {
        if !self.in_cluster {
            return Err(StructureError::BlockOutsideCluster.into());
        }
        let input_base = self
            .input_base
            .ok_or(StructureError::MissingClusterTimecode)?;
        let header = webm::parse_simple_block(payload).ok_or(StructureError::MalformedBlock)?;
        let absolute = input_base as i64 + i64::from(header.timecode);

        let output_base = match self.output_base {
            Some(base) => base,
            None => {
                let base = u64::try_from(absolute)
                    .map_err(|_| StructureError::BlockOffsetOutOfRange(absolute))?;
                self.sink.open_container(webm::ID_CLUSTER)?;
                self.sink.write_uint(webm::ID_TIMECODE, base)?;
                self.output_base = Some(base);
                base
            }
        };

        let span = absolute - output_base as i64;
        let relative =
            i16::try_from(span).map_err(|_| StructureError::BlockOffsetOutOfRange(span))?;

        let mut rewritten = payload.to_vec();
        webm::patch_block_timecode(&mut rewritten, &header, relative);
        self.sink.write_leaf(webm::ID_SIMPLE_BLOCK, &rewritten)?;

        if span >= self.min_cluster_ms as i64 {
            self.sink.close_container()?;
            self.output_base = None;
        }
        Ok(())
    }
}

impl<S: ElementSink> ElementHandler for ClusterRemuxer<S> {
    fn on_enter(&mut self, id: u32) -> Result<(), RemuxError> {
        match id {
            webm::ID_SEGMENT => {
                if self.in_segment {
                    return Err(StructureError::Duplicate("Segment").into());
                }
                self.sink.open_container(webm::ID_SEGMENT)?;
                self.in_segment = true;
            }
            webm::ID_CLUSTER => {
                if !self.in_segment {
                    return Err(StructureError::OutsideSegment("Cluster").into());
                }
                // No output container yet: output clusters open lazily on
                // the first block.
                self.in_cluster = true;
                self.input_base = None;
            }
            other => {
                tracing::debug!("ignoring container {:#x}", other);
            }
        }
        Ok(())
    }

    fn on_leaf(&mut self, id: u32, value: LeafValue<'_>) -> Result<(), RemuxError> {
        match (id, value) {
            (webm::ID_EBML_HEADER, LeafValue::Binary(payload)) => {
                if self.wrote_ebml_header {
                    return Err(StructureError::Duplicate("EBML header").into());
                }
                self.sink.write_leaf(id, payload)?;
                self.wrote_ebml_header = true;
            }
            (webm::ID_INFO, LeafValue::Binary(payload)) => {
                if !self.in_segment {
                    return Err(StructureError::OutsideSegment("Info").into());
                }
                if self.wrote_info {
                    return Err(StructureError::Duplicate("Info").into());
                }
                self.sink.write_leaf(id, payload)?;
                self.wrote_info = true;
            }
            (webm::ID_TRACKS, LeafValue::Binary(payload)) => {
                if !self.in_segment {
                    return Err(StructureError::OutsideSegment("Tracks").into());
                }
                if self.wrote_tracks {
                    return Err(StructureError::Duplicate("Tracks").into());
                }
                self.sink.write_leaf(id, payload)?;
                self.wrote_tracks = true;
            }
            (webm::ID_TIMECODE, LeafValue::Uint(timecode)) => {
                if !self.in_cluster {
                    return Err(StructureError::TimecodeOutsideCluster.into());
                }
                self.input_base = Some(timecode);
            }
            (webm::ID_SIMPLE_BLOCK, LeafValue::Binary(payload)) => {
                self.write_block(payload)?;
            }
            (other, _) => {
                // SeekHead, Cues, Void and friends carry byte offsets that
                // reclustering invalidates, so they are not carried over.
                tracing::debug!("dropping element {:#x}", other);
            }
        }
        Ok(())
    }

    fn on_exit(&mut self, id: u32) -> Result<(), RemuxError> {
        match id {
            webm::ID_SEGMENT => {
                if self.output_base.take().is_some() {
                    self.sink.close_container()?;
                }
                self.sink.close_container()?;
                self.in_segment = false;
            }
            webm::ID_CLUSTER => {
                // The pending output cluster stays open: it may span
                // several input clusters.
                self.in_cluster = false;
                self.input_base = None;
            }
            _ => {}
        }
        Ok(())
    }
}
