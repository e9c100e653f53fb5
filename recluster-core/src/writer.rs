//! Output writer over seekable and forward-only sinks.
//!
//! Two variants of one sink contract, picked once at construction. The
//! seekable variant writes an 8-byte size placeholder per container and
//! backpatches the true size on close; the forward-only variant commits
//! to the unknown-size marker and never patches, which is the only legal
//! choice for pipes and sockets.

use std::io::{self, Seek, SeekFrom, Write};

use crate::ebml;

/// Where remuxed elements go. The remuxer drives this without knowing
/// which variant it holds.
pub trait ElementSink {
    fn open_container(&mut self, id: u32) -> io::Result<()>;
    fn close_container(&mut self) -> io::Result<()>;
    fn write_leaf(&mut self, id: u32, payload: &[u8]) -> io::Result<()>;
    fn write_uint(&mut self, id: u32, value: u64) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

impl<S: ElementSink + ?Sized> ElementSink for Box<S> {
    fn open_container(&mut self, id: u32) -> io::Result<()> {
        (**self).open_container(id)
    }

    fn close_container(&mut self) -> io::Result<()> {
        (**self).close_container()
    }

    fn write_leaf(&mut self, id: u32, payload: &[u8]) -> io::Result<()> {
        (**self).write_leaf(id, payload)
    }

    fn write_uint(&mut self, id: u32, value: u64) -> io::Result<()> {
        (**self).write_uint(id, value)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

fn leaf_header(id: u32, payload_len: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    ebml::encode_id(&mut buf, id);
    ebml::encode_size(&mut buf, payload_len);
    buf
}

// ============================================================================
// Seekable Sink
// ============================================================================

pub struct SeekableWriter<W: Write + Seek> {
    out: W,
    /// Stream positions of the size placeholders of open containers,
    /// outermost first.
    open: Vec<u64>,
}

impl<W: Write + Seek> SeekableWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            open: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Seek> ElementSink for SeekableWriter<W> {
    fn open_container(&mut self, id: u32) -> io::Result<()> {
        let mut buf = Vec::with_capacity(4);
        ebml::encode_id(&mut buf, id);
        self.out.write_all(&buf)?;
        let placeholder_at = self.out.stream_position()?;
        // The placeholder is the unknown-size marker, so an interrupted
        // run still leaves a decodable stream behind.
        self.out.write_all(&ebml::UNKNOWN_SIZE_MARKER)?;
        self.open.push(placeholder_at);
        Ok(())
    }

    fn close_container(&mut self) -> io::Result<()> {
        let placeholder_at = self
            .open
            .pop()
            .ok_or_else(|| io::Error::other("close without an open container"))?;
        let end = self.out.stream_position()?;
        let payload_size = end - (placeholder_at + ebml::UNKNOWN_SIZE_MARKER.len() as u64);
        self.out.seek(SeekFrom::Start(placeholder_at))?;
        self.out.write_all(&ebml::encode_size_fixed8(payload_size))?;
        self.out.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn write_leaf(&mut self, id: u32, payload: &[u8]) -> io::Result<()> {
        self.out.write_all(&leaf_header(id, payload.len() as u64))?;
        self.out.write_all(payload)
    }

    fn write_uint(&mut self, id: u32, value: u64) -> io::Result<()> {
        self.write_leaf(id, &ebml::uint_payload(value))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

// ============================================================================
// Forward-Only Sink
// ============================================================================

pub struct StreamWriter<W: Write> {
    out: W,
    depth: usize,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, depth: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ElementSink for StreamWriter<W> {
    fn open_container(&mut self, id: u32) -> io::Result<()> {
        let mut buf = Vec::with_capacity(12);
        ebml::encode_id(&mut buf, id);
        buf.extend_from_slice(&ebml::UNKNOWN_SIZE_MARKER);
        self.out.write_all(&buf)?;
        self.depth += 1;
        Ok(())
    }

    fn close_container(&mut self) -> io::Result<()> {
        // Nothing on the wire: an unknown-size container is closed by the
        // next sibling id or by the stream ending.
        if self.depth == 0 {
            return Err(io::Error::other("close without an open container"));
        }
        self.depth -= 1;
        Ok(())
    }

    fn write_leaf(&mut self, id: u32, payload: &[u8]) -> io::Result<()> {
        self.out.write_all(&leaf_header(id, payload.len() as u64))?;
        self.out.write_all(payload)
    }

    fn write_uint(&mut self, id: u32, value: u64) -> io::Result<()> {
        self.write_leaf(id, &ebml::uint_payload(value))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
