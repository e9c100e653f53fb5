//! Resumable push-based EBML parser.
//!
//! Input arrives in chunks of arbitrary size and alignment (files, pipes,
//! sockets), so the parser is an explicit state machine: undecoded bytes
//! are retained between `append` calls, and an element header is only
//! consumed once the element can be fully acted on. Feeding a stream whole
//! or byte-at-a-time produces the same handler events.

use bytes::{Buf, BytesMut};

use crate::ebml::{self, Decoded, ElementSize};
use crate::error::{FramingError, RemuxError};
use crate::webm::{self, ElementKind};

// ============================================================================
// Handler Contract
// ============================================================================

/// A fully-decoded leaf payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafValue<'a> {
    Binary(&'a [u8]),
    Uint(u64),
}

/// Receives decoded elements as the parser walks the stream. Any error
/// returned from a callback aborts the parse.
pub trait ElementHandler {
    fn on_enter(&mut self, id: u32) -> Result<(), RemuxError>;
    fn on_leaf(&mut self, id: u32, value: LeafValue<'_>) -> Result<(), RemuxError>;
    fn on_exit(&mut self, id: u32) -> Result<(), RemuxError>;
}

// ============================================================================
// Parse Stack
// ============================================================================

#[derive(Debug)]
struct OpenElement {
    id: u32,
    size: ElementSize,
    /// Bytes the element's own header occupied.
    header_len: u64,
    /// Payload bytes consumed so far; for a known size never exceeds it.
    consumed: u64,
}

// ============================================================================
// Parser
// ============================================================================

pub struct EbmlParser<H: ElementHandler> {
    handler: H,
    stack: Vec<OpenElement>,
    /// Bytes received but not yet consumed; starts at `offset` in the stream.
    pending: BytesMut,
    offset: u64,
    poisoned: bool,
}

impl<H: ElementHandler> EbmlParser<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            stack: Vec::new(),
            pending: BytesMut::new(),
            offset: 0,
            poisoned: false,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Feed the next chunk of the stream. Decodes as many complete
    /// elements as the buffered bytes allow; partial state is retained for
    /// the next call. Once an error is returned the parser is dead and
    /// every further call fails.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), RemuxError> {
        if self.poisoned {
            return Err(FramingError::Poisoned.into());
        }
        self.pending.extend_from_slice(chunk);
        let result = self.run();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Signal that no further bytes will arrive. Unknown-size containers
    /// still open are closed innermost-first; anything else left open, or
    /// a leftover partial header, is a truncated stream.
    pub fn end_of_data(&mut self) -> Result<(), RemuxError> {
        if self.poisoned {
            return Err(FramingError::Poisoned.into());
        }
        let result = self.finish_stream();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn run(&mut self) -> Result<(), RemuxError> {
        loop {
            self.pop_completed()?;

            if self.pending.is_empty() {
                return Ok(());
            }

            let (id, id_len) = match ebml::decode_id(&self.pending) {
                Decoded::Complete(id, len) => (id, len),
                Decoded::NeedMoreData => return Ok(()),
                Decoded::Invalid => {
                    return Err(FramingError::InvalidId {
                        offset: self.offset,
                    }
                    .into());
                }
            };
            let (size, size_len) = match ebml::decode_size(&self.pending[id_len..]) {
                Decoded::Complete(size, len) => (size, len),
                Decoded::NeedMoreData => return Ok(()),
                Decoded::Invalid => {
                    return Err(FramingError::InvalidSize {
                        offset: self.offset + id_len as u64,
                    }
                    .into());
                }
            };
            let header_len = id_len + size_len;

            // A sibling at or above an unknown-size container's level
            // closes it, along with any unknown-size containers nested
            // inside it.
            while let Some(top) = self.stack.last() {
                if top.size == ElementSize::Unknown && webm::ends_unknown_size(top.id, id) {
                    self.close_top()?;
                } else {
                    break;
                }
            }
            self.pop_completed()?;

            if let Some(parent) = self.stack.last() {
                if let ElementSize::Known(parent_size) = parent.size {
                    let remaining = parent_size - parent.consumed;
                    let needed = header_len as u64
                        + match size {
                            ElementSize::Known(payload) => payload,
                            ElementSize::Unknown => 0,
                        };
                    if needed > remaining {
                        return Err(FramingError::ChildExceedsParent {
                            id,
                            parent: parent.id,
                            needed,
                            remaining,
                        }
                        .into());
                    }
                }
            }

            match (webm::element_kind(id), size) {
                (ElementKind::List, _) => {
                    self.consume(header_len);
                    self.stack.push(OpenElement {
                        id,
                        size,
                        header_len: header_len as u64,
                        consumed: 0,
                    });
                    self.handler.on_enter(id)?;
                }
                (_, ElementSize::Unknown) => {
                    return Err(FramingError::UnknownSizeNonList { id }.into());
                }
                (leaf_kind, ElementSize::Known(payload_size)) => {
                    if leaf_kind == ElementKind::UnsignedInt && payload_size > 8 {
                        return Err(FramingError::OversizedUint {
                            id,
                            size: payload_size,
                        }
                        .into());
                    }
                    let total = header_len as u64 + payload_size;
                    if (self.pending.len() as u64) < total {
                        // Header stays unconsumed; decoding restarts here
                        // once more bytes arrive.
                        return Ok(());
                    }
                    let total = total as usize;
                    let payload = &self.pending[header_len..total];
                    let value = match leaf_kind {
                        ElementKind::UnsignedInt => LeafValue::Uint(ebml::decode_uint(payload)),
                        _ => LeafValue::Binary(payload),
                    };
                    self.handler.on_leaf(id, value)?;
                    self.consume(total);
                    self.charge(total as u64);
                }
            }
        }
    }

    fn finish_stream(&mut self) -> Result<(), RemuxError> {
        if !self.pending.is_empty() {
            return Err(FramingError::TruncatedHeader {
                offset: self.offset,
            }
            .into());
        }
        while let Some(top) = self.stack.last() {
            match top.size {
                ElementSize::Unknown => self.close_top()?,
                ElementSize::Known(size) if top.consumed == size => self.close_top()?,
                ElementSize::Known(_) => {
                    return Err(FramingError::TruncatedElement { id: top.id }.into());
                }
            }
        }
        Ok(())
    }

    /// Pop every completed known-size element off the stack, crediting
    /// each one's footprint to its parent.
    fn pop_completed(&mut self) -> Result<(), RemuxError> {
        while let Some(top) = self.stack.last() {
            match top.size {
                ElementSize::Known(size) if top.consumed > size => {
                    return Err(FramingError::Overrun { id: top.id }.into());
                }
                ElementSize::Known(size) if top.consumed == size => {
                    self.close_top()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn close_top(&mut self) -> Result<(), RemuxError> {
        let Some(element) = self.stack.pop() else {
            return Ok(());
        };
        let footprint = element.header_len
            + match element.size {
                ElementSize::Known(size) => size,
                ElementSize::Unknown => element.consumed,
            };
        self.handler.on_exit(element.id)?;
        if let Some(parent) = self.stack.last_mut() {
            parent.consumed += footprint;
        }
        Ok(())
    }

    fn consume(&mut self, len: usize) {
        self.pending.advance(len);
        self.offset += len as u64;
    }

    fn charge(&mut self, len: u64) {
        if let Some(top) = self.stack.last_mut() {
            top.consumed += len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructureError;
    use crate::webm::{
        ID_CLUSTER, ID_EBML_HEADER, ID_INFO, ID_SEGMENT, ID_SIMPLE_BLOCK, ID_TIMECODE,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Enter(u32),
        Binary(u32, Vec<u8>),
        Uint(u32, u64),
        Exit(u32),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl ElementHandler for Recorder {
        fn on_enter(&mut self, id: u32) -> Result<(), RemuxError> {
            self.events.push(Event::Enter(id));
            Ok(())
        }

        fn on_leaf(&mut self, id: u32, value: LeafValue<'_>) -> Result<(), RemuxError> {
            match value {
                LeafValue::Binary(payload) => self.events.push(Event::Binary(id, payload.to_vec())),
                LeafValue::Uint(value) => self.events.push(Event::Uint(id, value)),
            }
            Ok(())
        }

        fn on_exit(&mut self, id: u32) -> Result<(), RemuxError> {
            self.events.push(Event::Exit(id));
            Ok(())
        }
    }

    fn leaf(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ebml::encode_id(&mut buf, id);
        ebml::encode_size(&mut buf, payload.len() as u64);
        buf.extend_from_slice(payload);
        buf
    }

    fn uint(id: u32, value: u64) -> Vec<u8> {
        leaf(id, &ebml::uint_payload(value))
    }

    fn list(id: u32, children: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ebml::encode_id(&mut buf, id);
        ebml::encode_size(&mut buf, children.len() as u64);
        buf.extend_from_slice(children);
        buf
    }

    fn unknown_list(id: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        ebml::encode_id(&mut buf, id);
        buf.push(0xFF);
        buf
    }

    fn sample_stream() -> Vec<u8> {
        let mut cluster_children = uint(ID_TIMECODE, 1000);
        cluster_children.extend(leaf(ID_SIMPLE_BLOCK, &[0x81, 0x00, 0x05, 0x80, 0xAA]));
        let mut segment_children = leaf(ID_INFO, b"info-payload");
        segment_children.extend(list(ID_CLUSTER, &cluster_children));

        let mut stream = leaf(ID_EBML_HEADER, b"ebml");
        stream.extend(list(ID_SEGMENT, &segment_children));
        stream
    }

    fn expected_sample_events() -> Vec<Event> {
        vec![
            Event::Binary(ID_EBML_HEADER, b"ebml".to_vec()),
            Event::Enter(ID_SEGMENT),
            Event::Binary(ID_INFO, b"info-payload".to_vec()),
            Event::Enter(ID_CLUSTER),
            Event::Uint(ID_TIMECODE, 1000),
            Event::Binary(ID_SIMPLE_BLOCK, vec![0x81, 0x00, 0x05, 0x80, 0xAA]),
            Event::Exit(ID_CLUSTER),
            Event::Exit(ID_SEGMENT),
        ]
    }

    #[test]
    fn parses_nested_elements() {
        let mut parser = EbmlParser::new(Recorder::default());
        parser.append(&sample_stream()).expect("append");
        parser.end_of_data().expect("end of data");
        assert_eq!(parser.handler().events, expected_sample_events());
    }

    #[test]
    fn byte_at_a_time_feed_is_equivalent() {
        let mut parser = EbmlParser::new(Recorder::default());
        for byte in sample_stream() {
            parser.append(&[byte]).expect("append");
        }
        parser.end_of_data().expect("end of data");
        assert_eq!(parser.handler().events, expected_sample_events());
    }

    #[test]
    fn unknown_size_cluster_closes_at_next_cluster() {
        let mut stream = unknown_list(ID_SEGMENT);
        stream.extend(unknown_list(ID_CLUSTER));
        stream.extend(uint(ID_TIMECODE, 0));
        stream.extend(unknown_list(ID_CLUSTER));
        stream.extend(uint(ID_TIMECODE, 40));

        let mut parser = EbmlParser::new(Recorder::default());
        parser.append(&stream).expect("append");
        parser.end_of_data().expect("end of data");

        assert_eq!(
            parser.handler().events,
            vec![
                Event::Enter(ID_SEGMENT),
                Event::Enter(ID_CLUSTER),
                Event::Uint(ID_TIMECODE, 0),
                Event::Exit(ID_CLUSTER),
                Event::Enter(ID_CLUSTER),
                Event::Uint(ID_TIMECODE, 40),
                Event::Exit(ID_CLUSTER),
                Event::Exit(ID_SEGMENT),
            ]
        );
    }

    #[test]
    fn end_of_data_closes_unknown_containers_innermost_first() {
        let mut stream = unknown_list(ID_SEGMENT);
        stream.extend(unknown_list(ID_CLUSTER));
        stream.extend(uint(ID_TIMECODE, 7));

        let mut parser = EbmlParser::new(Recorder::default());
        parser.append(&stream).expect("append");
        parser.end_of_data().expect("end of data");

        assert_eq!(
            parser.handler().events[2..],
            [Event::Exit(ID_CLUSTER), Event::Exit(ID_SEGMENT)]
        );
    }

    #[test]
    fn empty_known_size_list_enters_and_exits() {
        let mut parser = EbmlParser::new(Recorder::default());
        let mut stream = unknown_list(ID_SEGMENT);
        stream.extend(list(ID_CLUSTER, &[]));
        parser.append(&stream).expect("append");
        parser.end_of_data().expect("end of data");
        assert_eq!(
            parser.handler().events,
            vec![
                Event::Enter(ID_SEGMENT),
                Event::Enter(ID_CLUSTER),
                Event::Exit(ID_CLUSTER),
                Event::Exit(ID_SEGMENT),
            ]
        );
    }

    #[test]
    fn child_exceeding_parent_budget_fails() {
        let mut stream = Vec::new();
        ebml::encode_id(&mut stream, ID_SEGMENT);
        ebml::encode_size(&mut stream, 3);
        stream.extend(leaf(ID_INFO, b"wont-fit"));

        let mut parser = EbmlParser::new(Recorder::default());
        let err = parser.append(&stream).expect_err("must fail");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::ChildExceedsParent { .. })
        ));
        // Only the segment entry was emitted before the failure.
        assert_eq!(parser.handler().events, vec![Event::Enter(ID_SEGMENT)]);
        assert!(matches!(
            parser.append(&[0x00]),
            Err(RemuxError::Framing(FramingError::Poisoned))
        ));
    }

    #[test]
    fn truncated_leaf_is_an_error_at_end_of_data() {
        let stream = leaf(ID_INFO, b"full-payload");
        let mut parser = EbmlParser::new(Recorder::default());
        parser.append(&stream[..stream.len() - 3]).expect("append");
        let err = parser.end_of_data().expect_err("truncated");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::TruncatedHeader { .. })
        ));
    }

    #[test]
    fn unfinished_known_size_list_is_an_error_at_end_of_data() {
        let mut stream = Vec::new();
        ebml::encode_id(&mut stream, ID_SEGMENT);
        ebml::encode_size(&mut stream, 100);

        let mut parser = EbmlParser::new(Recorder::default());
        parser.append(&stream).expect("append");
        let err = parser.end_of_data().expect_err("truncated");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::TruncatedElement { id: ID_SEGMENT })
        ));
    }

    #[test]
    fn invalid_id_fails() {
        let mut parser = EbmlParser::new(Recorder::default());
        let err = parser.append(&[0x00]).expect_err("invalid id");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::InvalidId { offset: 0 })
        ));
    }

    #[test]
    fn invalid_size_fails() {
        let mut parser = EbmlParser::new(Recorder::default());
        let err = parser.append(&[0xA3, 0x00]).expect_err("invalid size");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::InvalidSize { offset: 1 })
        ));
    }

    #[test]
    fn unknown_size_leaf_is_rejected() {
        let mut stream = Vec::new();
        ebml::encode_id(&mut stream, ID_INFO);
        stream.push(0xFF);

        let mut parser = EbmlParser::new(Recorder::default());
        let err = parser.append(&stream).expect_err("unknown-size leaf");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::UnknownSizeNonList { id: ID_INFO })
        ));
    }

    #[test]
    fn oversized_uint_is_rejected() {
        let mut stream = unknown_list(ID_SEGMENT);
        stream.extend(unknown_list(ID_CLUSTER));
        ebml::encode_id(&mut stream, ID_TIMECODE);
        ebml::encode_size(&mut stream, 9);

        let mut parser = EbmlParser::new(Recorder::default());
        let err = parser.append(&stream).expect_err("oversized uint");
        assert!(matches!(
            err,
            RemuxError::Framing(FramingError::OversizedUint { id: ID_TIMECODE, size: 9 })
        ));
    }

    struct RejectsInfo;

    impl ElementHandler for RejectsInfo {
        fn on_enter(&mut self, _id: u32) -> Result<(), RemuxError> {
            Ok(())
        }

        fn on_leaf(&mut self, id: u32, _value: LeafValue<'_>) -> Result<(), RemuxError> {
            if id == ID_INFO {
                return Err(StructureError::Duplicate("Info").into());
            }
            Ok(())
        }

        fn on_exit(&mut self, _id: u32) -> Result<(), RemuxError> {
            Ok(())
        }
    }

    #[test]
    fn handler_rejection_poisons_the_parser() {
        let mut stream = unknown_list(ID_SEGMENT);
        stream.extend(leaf(ID_INFO, b"x"));

        let mut parser = EbmlParser::new(RejectsInfo);
        assert!(matches!(
            parser.append(&stream),
            Err(RemuxError::Structure(_))
        ));
        assert!(matches!(
            parser.append(&[0x00]),
            Err(RemuxError::Framing(FramingError::Poisoned))
        ));
    }
}
