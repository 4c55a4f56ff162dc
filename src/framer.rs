//! Streaming CoT event framer
//!
//! CoT streams carry concatenated `<event …>…</event>` XML documents with
//! no length prefix and no delimiter, split across TCP reads at arbitrary
//! byte boundaries. The framer accumulates bytes and emits each complete
//! `event` document as a single zero-copy slice.
//!
//! The inner schema is never interpreted. The only structure tracked is
//! what is needed to find the end of the outer element without being fooled
//! by markup that merely looks like it: quoted attribute values, comments,
//! CDATA sections, processing instructions, and nested elements that are
//! themselves named `event` (matched by local name, so `<cot:event>` counts).
//!
//! Memory is bounded in both directions: stray bytes between documents are
//! discarded as they are scanned, and a document that grows past
//! `max_event_bytes` fails the connection before the buffer can.

use crate::error::FramingError;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    /// Opening tag for an element with local name `event`.
    EventOpen,
    /// Closing tag for an element with local name `event`.
    EventClose,
    /// Any other element tag, opening or closing.
    Other,
}

/// Scanner state, persisted across arbitrarily small input chunks.
/// `depth` counts enclosing `event` elements; 0 means between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between documents: skipping whitespace, prologs, and stray text.
    SeekOpen,
    /// Character content inside an event.
    Text { depth: u32 },
    /// Inside a tag, scanning for its unquoted `>`.
    Tag {
        depth: u32,
        kind: TagKind,
        quote: Option<u8>,
        self_close: bool,
    },
    /// Inside `<!-- … -->`. `dashes` is the run of trailing `-` seen so far.
    Comment { depth: u32, dashes: u8 },
    /// Inside `<![CDATA[ … ]]>`. `brackets` is the run of trailing `]`.
    Cdata { depth: u32, brackets: u8 },
    /// Inside `<? … ?>` (prolog or processing instruction).
    Pi { depth: u32, question: bool },
    /// Inside `<! … >` other than a comment or CDATA (e.g. DOCTYPE).
    /// Only legal between documents.
    Declaration { depth: u32, quote: Option<u8> },
}

enum Step {
    Continue,
    NeedMore,
    Emit(Bytes),
}

enum Classified {
    NeedMore,
    Comment,
    Cdata,
    Pi,
    Declaration,
    OpenTag { name_end: usize, is_event: bool },
    CloseTag { name_end: usize, is_event: bool },
    Invalid,
}

enum NameParse {
    NeedMore,
    Invalid,
    Name { end: usize, is_event: bool },
}

/// Incremental framer for one connection's inbound byte stream.
pub struct CotFramer {
    buf: BytesMut,
    state: State,
    /// Next unexamined byte in `buf`.
    scan: usize,
    min_event_bytes: usize,
    max_event_bytes: usize,
}

impl CotFramer {
    pub fn new(min_event_bytes: usize, max_event_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            state: State::SeekOpen,
            scan: 0,
            min_event_bytes,
            max_event_bytes,
        }
    }

    /// Append a chunk of inbound bytes. Call [`next_event`](Self::next_event)
    /// until it returns `Ok(None)` after each append.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Scan forward and return the next complete event document, if any.
    ///
    /// The returned bytes are exactly the wire range from `<` of the opening
    /// tag through `>` of the closing tag, inclusive.
    pub fn next_event(&mut self) -> Result<Option<Bytes>, FramingError> {
        loop {
            let step = match self.state {
                State::SeekOpen => self.scan_seek_open()?,
                State::Text { depth } => self.scan_text(depth)?,
                State::Tag {
                    depth,
                    kind,
                    quote,
                    self_close,
                } => self.scan_tag(depth, kind, quote, self_close)?,
                State::Comment { depth, dashes } => self.scan_comment(depth, dashes),
                State::Cdata { depth, brackets } => self.scan_cdata(depth, brackets),
                State::Pi { depth, question } => self.scan_pi(depth, question),
                State::Declaration { depth, quote } => self.scan_declaration(depth, quote),
            };
            match step {
                Step::Continue => continue,
                Step::Emit(doc) => return Ok(Some(doc)),
                Step::NeedMore => {
                    if self.in_event() {
                        // Everything from the event's `<` to the end of the
                        // buffer belongs to the current incomplete document.
                        if self.buf.len() > self.max_event_bytes {
                            return Err(FramingError::OversizedEvent {
                                size: self.buf.len(),
                                limit: self.max_event_bytes,
                            });
                        }
                    } else if self.scan > 0 {
                        // Stray bytes between documents are not kept.
                        let _ = self.buf.split_to(self.scan);
                        self.scan = 0;
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// End-of-stream check: a partially buffered document is an error.
    pub fn finish(&self) -> Result<(), FramingError> {
        if self.in_event() {
            Err(FramingError::TruncatedEvent)
        } else {
            Ok(())
        }
    }

    /// True once the opening `<event` of an unemitted document has been seen.
    /// The buffer is pinned from that point: byte 0 is the document start.
    fn in_event(&self) -> bool {
        match self.state {
            State::SeekOpen => false,
            State::Text { depth }
            | State::Comment { depth, .. }
            | State::Cdata { depth, .. }
            | State::Pi { depth, .. }
            | State::Declaration { depth, .. } => depth > 0,
            State::Tag { depth, kind, .. } => depth > 0 || kind == TagKind::EventOpen,
        }
    }

    fn scan_seek_open(&mut self) -> Result<Step, FramingError> {
        while self.scan < self.buf.len() {
            let Some(rel) = self.buf[self.scan..].iter().position(|&b| b == b'<') else {
                self.scan = self.buf.len();
                return Ok(Step::NeedMore);
            };
            let p = self.scan + rel;
            self.scan = p;
            match self.classify(p) {
                Classified::NeedMore => return Ok(Step::NeedMore),
                Classified::Comment => {
                    self.state = State::Comment { depth: 0, dashes: 0 };
                    self.scan = p + 4;
                    return Ok(Step::Continue);
                }
                Classified::Cdata => {
                    self.state = State::Cdata {
                        depth: 0,
                        brackets: 0,
                    };
                    self.scan = p + 9;
                    return Ok(Step::Continue);
                }
                Classified::Pi => {
                    self.state = State::Pi {
                        depth: 0,
                        question: false,
                    };
                    self.scan = p + 2;
                    return Ok(Step::Continue);
                }
                Classified::Declaration => {
                    self.state = State::Declaration {
                        depth: 0,
                        quote: None,
                    };
                    self.scan = p + 2;
                    return Ok(Step::Continue);
                }
                Classified::OpenTag { name_end, is_event } if is_event => {
                    // Document start: pin the buffer to the `<` so the whole
                    // range can be emitted as one slice.
                    let _ = self.buf.split_to(p);
                    self.scan = name_end - p;
                    self.state = State::Tag {
                        depth: 0,
                        kind: TagKind::EventOpen,
                        quote: None,
                        self_close: false,
                    };
                    return Ok(Step::Continue);
                }
                Classified::OpenTag { name_end, .. } | Classified::CloseTag { name_end, .. } => {
                    // Stray element between documents: skip its tag.
                    self.state = State::Tag {
                        depth: 0,
                        kind: TagKind::Other,
                        quote: None,
                        self_close: false,
                    };
                    self.scan = name_end;
                    return Ok(Step::Continue);
                }
                Classified::Invalid => {
                    // Not markup; stray text.
                    self.scan = p + 1;
                }
            }
        }
        Ok(Step::NeedMore)
    }

    fn scan_text(&mut self, depth: u32) -> Result<Step, FramingError> {
        let Some(rel) = self.buf[self.scan..].iter().position(|&b| b == b'<') else {
            self.scan = self.buf.len();
            return Ok(Step::NeedMore);
        };
        let p = self.scan + rel;
        self.scan = p;
        match self.classify(p) {
            Classified::NeedMore => Ok(Step::NeedMore),
            Classified::Comment => {
                self.state = State::Comment { depth, dashes: 0 };
                self.scan = p + 4;
                Ok(Step::Continue)
            }
            Classified::Cdata => {
                self.state = State::Cdata { depth, brackets: 0 };
                self.scan = p + 9;
                Ok(Step::Continue)
            }
            Classified::Pi => {
                self.state = State::Pi {
                    depth,
                    question: false,
                };
                self.scan = p + 2;
                Ok(Step::Continue)
            }
            Classified::Declaration => {
                Err(FramingError::MalformedXml("markup declaration inside event"))
            }
            Classified::OpenTag { name_end, is_event } => {
                self.state = State::Tag {
                    depth,
                    kind: if is_event {
                        TagKind::EventOpen
                    } else {
                        TagKind::Other
                    },
                    quote: None,
                    self_close: false,
                };
                self.scan = name_end;
                Ok(Step::Continue)
            }
            Classified::CloseTag { name_end, is_event } => {
                self.state = State::Tag {
                    depth,
                    kind: if is_event {
                        TagKind::EventClose
                    } else {
                        TagKind::Other
                    },
                    quote: None,
                    self_close: false,
                };
                self.scan = name_end;
                Ok(Step::Continue)
            }
            Classified::Invalid => Err(FramingError::MalformedXml("invalid character after '<'")),
        }
    }

    fn scan_tag(
        &mut self,
        depth: u32,
        kind: TagKind,
        mut quote: Option<u8>,
        mut self_close: bool,
    ) -> Result<Step, FramingError> {
        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            self.scan += 1;
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => {
                        quote = Some(b);
                        self_close = false;
                    }
                    b'/' => self_close = true,
                    b'>' => return self.tag_finished(depth, kind, self_close),
                    _ => self_close = false,
                },
            }
        }
        self.state = State::Tag {
            depth,
            kind,
            quote,
            self_close,
        };
        Ok(Step::NeedMore)
    }

    fn tag_finished(
        &mut self,
        depth: u32,
        kind: TagKind,
        self_close: bool,
    ) -> Result<Step, FramingError> {
        match kind {
            TagKind::Other => {
                self.state = if depth == 0 {
                    State::SeekOpen
                } else {
                    State::Text { depth }
                };
                Ok(Step::Continue)
            }
            TagKind::EventOpen => {
                if depth == 0 && self_close {
                    // `<event …/>` with no children is still a complete document.
                    self.emit()
                } else {
                    let depth = if self_close { depth } else { depth + 1 };
                    self.state = State::Text { depth };
                    Ok(Step::Continue)
                }
            }
            TagKind::EventClose => {
                if depth <= 1 {
                    self.emit()
                } else {
                    self.state = State::Text { depth: depth - 1 };
                    Ok(Step::Continue)
                }
            }
        }
    }

    /// Emit the pinned range `[0, scan)` as one document.
    fn emit(&mut self) -> Result<Step, FramingError> {
        let doc = self.buf.split_to(self.scan).freeze();
        self.scan = 0;
        self.state = State::SeekOpen;
        if doc.len() > self.max_event_bytes {
            return Err(FramingError::OversizedEvent {
                size: doc.len(),
                limit: self.max_event_bytes,
            });
        }
        if doc.len() < self.min_event_bytes {
            return Err(FramingError::MalformedXml("event below minimum size"));
        }
        if std::str::from_utf8(&doc).is_err() {
            return Err(FramingError::MalformedXml("event is not valid UTF-8"));
        }
        Ok(Step::Emit(doc))
    }

    fn scan_comment(&mut self, depth: u32, mut dashes: u8) -> Step {
        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            self.scan += 1;
            if b == b'-' {
                dashes = (dashes + 1).min(2);
            } else if b == b'>' && dashes >= 2 {
                self.state = if depth == 0 {
                    State::SeekOpen
                } else {
                    State::Text { depth }
                };
                return Step::Continue;
            } else {
                dashes = 0;
            }
        }
        self.state = State::Comment { depth, dashes };
        Step::NeedMore
    }

    fn scan_cdata(&mut self, depth: u32, mut brackets: u8) -> Step {
        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            self.scan += 1;
            if b == b']' {
                brackets = (brackets + 1).min(2);
            } else if b == b'>' && brackets >= 2 {
                self.state = if depth == 0 {
                    State::SeekOpen
                } else {
                    State::Text { depth }
                };
                return Step::Continue;
            } else {
                brackets = 0;
            }
        }
        self.state = State::Cdata { depth, brackets };
        Step::NeedMore
    }

    fn scan_pi(&mut self, depth: u32, mut question: bool) -> Step {
        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            self.scan += 1;
            if b == b'>' && question {
                self.state = if depth == 0 {
                    State::SeekOpen
                } else {
                    State::Text { depth }
                };
                return Step::Continue;
            }
            question = b == b'?';
        }
        self.state = State::Pi { depth, question };
        Step::NeedMore
    }

    fn scan_declaration(&mut self, depth: u32, mut quote: Option<u8>) -> Step {
        while self.scan < self.buf.len() {
            let b = self.buf[self.scan];
            self.scan += 1;
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'>' => {
                        self.state = if depth == 0 {
                            State::SeekOpen
                        } else {
                            State::Text { depth }
                        };
                        return Step::Continue;
                    }
                    _ => {}
                },
            }
        }
        self.state = State::Declaration { depth, quote };
        Step::NeedMore
    }

    /// Classify the markup starting at `buf[p] == b'<'`.
    fn classify(&self, p: usize) -> Classified {
        const COMMENT: &[u8] = b"<!--";
        const CDATA: &[u8] = b"<![CDATA[";

        let buf = &self.buf[..];
        if p + 1 >= buf.len() {
            return Classified::NeedMore;
        }
        match buf[p + 1] {
            b'!' => {
                let avail = &buf[p..];
                let head = &avail[..avail.len().min(COMMENT.len())];
                if head == COMMENT {
                    return Classified::Comment;
                }
                if COMMENT.starts_with(head) {
                    return Classified::NeedMore;
                }
                let head = &avail[..avail.len().min(CDATA.len())];
                if head == CDATA {
                    return Classified::Cdata;
                }
                if CDATA.starts_with(head) {
                    return Classified::NeedMore;
                }
                Classified::Declaration
            }
            b'?' => Classified::Pi,
            b'/' => match self.parse_name(p + 2) {
                NameParse::NeedMore => Classified::NeedMore,
                NameParse::Invalid => Classified::Invalid,
                NameParse::Name { end, is_event } => Classified::CloseTag {
                    name_end: end,
                    is_event,
                },
            },
            _ => match self.parse_name(p + 1) {
                NameParse::NeedMore => Classified::NeedMore,
                NameParse::Invalid => Classified::Invalid,
                NameParse::Name { end, is_event } => Classified::OpenTag {
                    name_end: end,
                    is_event,
                },
            },
        }
    }

    /// Parse a qualified element name starting at `start`. `end` is the
    /// offset of the terminator (whitespace, `/`, or `>`), which is not
    /// consumed.
    fn parse_name(&self, start: usize) -> NameParse {
        let buf = &self.buf[..];
        if start >= buf.len() {
            return NameParse::NeedMore;
        }
        if !is_name_start(buf[start]) {
            return NameParse::Invalid;
        }
        let mut i = start + 1;
        while i < buf.len() {
            let b = buf[i];
            if is_name_terminator(b) {
                return NameParse::Name {
                    end: i,
                    is_event: local_name(&buf[start..i]) == b"event",
                };
            }
            if !is_name_char(b) {
                return NameParse::Invalid;
            }
            i += 1;
        }
        NameParse::NeedMore
    }
}

fn is_name_terminator(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>')
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x80
}

fn is_name_char(b: u8) -> bool {
    is_name_start(b) || b.is_ascii_digit() || b == b'-' || b == b'.'
}

/// Part of a qualified name after the last `:`.
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"<event version="2.0" uid="X1" type="a-f-G" how="m-g"><point lat="0" lon="0" hae="0" ce="9" le="9"/></event>"#;

    fn framer() -> CotFramer {
        CotFramer::new(32, 64 * 1024)
    }

    /// Feed everything at once and collect all emitted documents.
    fn feed(framer: &mut CotFramer, input: &[u8]) -> Result<Vec<Bytes>, FramingError> {
        framer.extend(input);
        let mut out = Vec::new();
        while let Some(doc) = framer.next_event()? {
            out.push(doc);
        }
        Ok(out)
    }

    #[test]
    fn frames_single_event() {
        let mut f = framer();
        let docs = feed(&mut f, EVENT.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], EVENT.as_bytes());
        f.finish().unwrap();
    }

    #[test]
    fn skips_xml_prolog() {
        let mut f = framer();
        let input = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{EVENT}");
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], EVENT.as_bytes());
    }

    #[test]
    fn frames_concatenated_events() {
        let mut f = framer();
        let input = format!("{EVENT}{EVENT}{EVENT}");
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 3);
        for doc in docs {
            assert_eq!(&doc[..], EVENT.as_bytes());
        }
    }

    #[test]
    fn frames_events_with_prolog_between_each() {
        let mut f = framer();
        let input = format!(
            "<?xml version=\"1.0\"?>{EVENT}<?xml version=\"1.0\"?>{EVENT}"
        );
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn chunking_does_not_change_output() {
        // Property: framing is invariant under how the bytes are chunked.
        let input = format!("<?xml version=\"1.0\"?>\n{EVENT}  {EVENT}");
        for chunk_size in [1, 2, 3, 7, 16, 64, input.len()] {
            let mut f = framer();
            let mut docs = Vec::new();
            for chunk in input.as_bytes().chunks(chunk_size) {
                f.extend(chunk);
                while let Some(doc) = f.next_event().unwrap() {
                    docs.push(doc);
                }
            }
            assert_eq!(docs.len(), 2, "chunk_size {}", chunk_size);
            assert_eq!(&docs[0][..], EVENT.as_bytes());
            assert_eq!(&docs[1][..], EVENT.as_bytes());
            f.finish().unwrap();
        }
    }

    #[test]
    fn angle_brackets_inside_attributes() {
        let mut f = framer();
        let input = r#"<event uid="a<b>c" note='</event>'><detail/></event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn close_tag_inside_comment_is_ignored() {
        let mut f = framer();
        let input = r#"<event uid="c1"><!-- </event> not the end --><detail/></event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn close_tag_inside_cdata_is_ignored() {
        let mut f = framer();
        let input = r#"<event uid="c2"><detail><![CDATA[</event>]]></detail></event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn nested_event_elements_track_depth() {
        let mut f = framer();
        let input = r#"<event uid="outer"><event uid="inner"></event><detail/></event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn self_closing_nested_event() {
        let mut f = framer();
        let input = r#"<event uid="outer"><event uid="inner"/><detail/></event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn self_closing_outer_event() {
        let mut f = framer();
        let input = r#"<event version="2.0" uid="solo" type="t-x-c-t"/>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn prefixed_local_name_matches() {
        let mut f = framer();
        let input = r#"<cot:event uid="ns1"><cot:point lat="1" lon="2"/></cot:event>"#;
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], input.as_bytes());
    }

    #[test]
    fn stray_text_between_events_is_skipped() {
        let mut f = framer();
        let input = format!("\r\n junk > text \n{EVENT}\n more junk");
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        f.finish().unwrap();
    }

    #[test]
    fn eventive_element_is_not_an_event() {
        // `<eventive>` shares the prefix but is a different element.
        let mut f = framer();
        let input = format!("<eventive>stuff</eventive>{EVENT}");
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(&docs[0][..], EVENT.as_bytes());
    }

    #[test]
    fn oversized_event_is_rejected() {
        let mut f = CotFramer::new(32, 4096);
        let body = "x".repeat(5000);
        let input = format!(r#"<event uid="big"><detail>{body}</detail></event>"#);
        let err = feed(&mut f, input.as_bytes()).unwrap_err();
        assert!(matches!(err, FramingError::OversizedEvent { limit: 4096, .. }));
    }

    #[test]
    fn exact_limit_is_accepted() {
        let limit = 4096;
        let prefix = r#"<event uid="fit"><detail>"#;
        let suffix = "</detail></event>";
        let body = "y".repeat(limit - prefix.len() - suffix.len());
        let input = format!("{prefix}{body}{suffix}");
        assert_eq!(input.len(), limit);

        let mut f = CotFramer::new(32, limit);
        let docs = feed(&mut f, input.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].len(), limit);
    }

    #[test]
    fn truncated_event_fails_on_finish() {
        let mut f = framer();
        let docs = feed(&mut f, br#"<event uid="partial"><point"#).unwrap();
        assert!(docs.is_empty());
        assert!(matches!(f.finish(), Err(FramingError::TruncatedEvent)));
    }

    #[test]
    fn clean_eof_between_events_is_ok() {
        let mut f = framer();
        feed(&mut f, EVENT.as_bytes()).unwrap();
        feed(&mut f, b"  \n").unwrap();
        f.finish().unwrap();
    }

    #[test]
    fn event_below_minimum_size_is_malformed() {
        let mut f = framer();
        let err = feed(&mut f, b"<event/>").unwrap_err();
        assert!(matches!(err, FramingError::MalformedXml(_)));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut f = framer();
        let mut input = Vec::from(&b"<event uid=\"bad\"><detail>"[..]);
        input.extend_from_slice(&[0xff, 0xfe, 0x41]);
        input.extend_from_slice(b"</detail></event>");
        let err = feed(&mut f, &input).unwrap_err();
        assert!(matches!(err, FramingError::MalformedXml(_)));
    }

    #[test]
    fn declaration_inside_event_is_malformed() {
        let mut f = framer();
        let err = feed(&mut f, br#"<event uid="d"><!DOCTYPE foo></event>"#).unwrap_err();
        assert!(matches!(err, FramingError::MalformedXml(_)));
    }

    #[test]
    fn stray_bytes_are_drained_between_documents() {
        let mut f = framer();
        // A large run of garbage must not accumulate in the buffer.
        for _ in 0..100 {
            feed(&mut f, &[b' '; 1024]).unwrap();
        }
        assert!(f.buf.len() <= 1);
        let docs = feed(&mut f, EVENT.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
    }
}
