//! Protocol decoder
//!
//! A byte-at-a-time state machine that turns the inbound byte stream of one
//! connection into protocol operations. All decoder variables live in a
//! [`ParseState`] owned by the connection, so an operation may be split
//! across any number of reads: whatever part of an argument line or payload
//! is still unterminated when a chunk ends is copied into the state's own
//! buffers before [`decode`] returns.
//!
//! Completed operations are handed to a [`SessionHandler`]. Faults returned
//! by the handler (or raised by the decoder itself) are applied here:
//! fatal faults close the connection and abandon the rest of the chunk,
//! non-fatal ones produce an error line, reset the parser and decoding
//! continues with the next operation.

use gnat_core::{ConnectOptions, Error, Result};

/// Decoder states. Keyword states spell out the operation names one
/// character at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    OpStart,

    // CONNECT
    OpC,
    OpCo,
    OpCon,
    OpConn,
    OpConne,
    OpConnec,
    OpConnect,
    OpConnectSpc,
    ConnectArg,

    // PING / PONG / PUB
    OpP,
    OpPi,
    OpPin,
    OpPing,
    OpPo,
    OpPon,
    OpPong,
    OpPu,
    OpPub,
    OpPubSpc,
    PubArg,
    MsgPayload,
    MsgEndR,

    // SUB
    OpS,
    OpSu,
    OpSub,
    OpSubSpc,
    SubArg,

    // UNSUB
    OpU,
    OpUn,
    OpUns,
    OpUnsu,
    OpUnsub,
    OpUnsubSpc,
    UnsubArg,
}

/// Per-connection decoder variables
#[derive(Debug)]
pub struct ParseState {
    state: ParserState,
    /// Start of the current argument or payload within the chunk being decoded
    start: usize,
    /// End of the payload within the chunk, set when its terminator is seen
    span_end: usize,
    /// The current argument or payload continues from an earlier chunk
    buffered: bool,
    /// The last argument byte was `\r`
    drop: bool,
    arg_buf: Vec<u8>,
    msg_buf: Vec<u8>,
    capacity: usize,
    pending_subject: String,
    payload_size: usize,
}

impl ParseState {
    /// Create decoder state whose argument and payload buffers hold at most
    /// `capacity` bytes each
    pub fn new(capacity: usize) -> Self {
        Self {
            state: ParserState::OpStart,
            start: 0,
            span_end: 0,
            buffered: false,
            drop: false,
            arg_buf: Vec::with_capacity(capacity),
            msg_buf: Vec::with_capacity(capacity),
            capacity,
            pending_subject: String::new(),
            payload_size: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subject of the PUB whose payload is being read
    pub fn pending_subject(&self) -> &str {
        &self.pending_subject
    }

    /// Payload size declared by the PUB whose payload is being read
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Record the subject and declared size parsed from a PUB argument line
    pub fn set_pending_publish(&mut self, subject: &str, payload_size: usize) {
        self.pending_subject.clear();
        self.pending_subject.push_str(subject);
        self.payload_size = payload_size;
    }

    /// Return to `OpStart`, discarding partial data. Buffer allocations are kept.
    pub fn reset(&mut self) {
        self.state = ParserState::OpStart;
        self.start = 0;
        self.span_end = 0;
        self.buffered = false;
        self.drop = false;
        self.arg_buf.clear();
        self.msg_buf.clear();
        self.pending_subject.clear();
        self.payload_size = 0;
    }

    fn begin_span(&mut self, state: ParserState, start: usize) {
        self.state = state;
        self.start = start;
        self.buffered = false;
        self.drop = false;
    }
}

/// The operations a connection exposes to the decoder
pub trait SessionHandler {
    /// Decoder variables of this connection
    fn parse_state(&mut self) -> &mut ParseState;

    /// A CONNECT line with syntactically valid JSON options completed
    fn process_connect(&mut self, options: ConnectOptions) -> Result<()>;

    fn process_ping(&mut self) -> Result<()>;

    fn process_pong(&mut self) -> Result<()>;

    /// The `<subject> <size>` line of a PUB completed
    fn process_pub_args(&mut self, args: &str) -> Result<()>;

    /// The payload of a PUB completed
    fn process_pub(&mut self, payload: &[u8]) -> Result<()>;

    /// The `<subject> <sid>` line of a SUB completed
    fn process_sub(&mut self, args: &str) -> Result<()>;

    /// The `<sid>` line of an UNSUB completed
    fn process_unsub(&mut self, args: &str) -> Result<()>;

    /// Write `reason` to the peer and close the connection
    fn close_connection(&mut self, reason: &str);

    /// Write an error line to the peer, keeping the connection open
    fn send_error(&mut self, message: &str);

    fn reset_parsing_vars(&mut self) {
        self.parse_state().reset();
    }
}

/// Generic diagnostic for faults outside the protocol taxonomy
pub const UNEXPECTED_ERROR: &str = "Unexpected error";

/// Feed one chunk of inbound bytes through the state machine
pub fn decode<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8]) {
    for i in 0..chunk.len() {
        if let Err(err) = step(handler, chunk, i) {
            if !handle_fault(handler, err) {
                return;
            }
        }
    }

    stash_partial(handler, chunk);
}

/// Apply the fault policy. Returns whether decoding may continue.
fn handle_fault<H: SessionHandler + ?Sized>(handler: &mut H, err: Error) -> bool {
    match err {
        Error::Unexpected(_) => {
            handler.close_connection(UNEXPECTED_ERROR);
            false
        }
        err if err.is_fatal() => {
            handler.close_connection(&err.to_string());
            false
        }
        err => {
            handler.send_error(&err.to_string());
            handler.reset_parsing_vars();
            true
        }
    }
}

fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Advance to `next` if `b` is `expected` in either case
fn keyword(b: u8, expected: u8, next: ParserState) -> Result<ParserState> {
    if b.eq_ignore_ascii_case(&expected) {
        Ok(next)
    } else {
        Err(Error::UnknownProtocolOperation)
    }
}

/// Advance to `next` on the separator that follows a keyword
fn separator(b: u8, next: ParserState) -> Result<ParserState> {
    if is_separator(b) {
        Ok(next)
    } else {
        Err(Error::UnknownProtocolOperation)
    }
}

fn step<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8], i: usize) -> Result<()> {
    use ParserState::*;

    let b = chunk[i];
    let next = match handler.parse_state().state {
        OpStart => match b.to_ascii_uppercase() {
            b'C' => OpC,
            b'P' => OpP,
            b'S' => OpS,
            b'U' => OpU,
            _ => return Err(Error::UnknownProtocolOperation),
        },

        OpC => keyword(b, b'O', OpCo)?,
        OpCo => keyword(b, b'N', OpCon)?,
        OpCon => keyword(b, b'N', OpConn)?,
        OpConn => keyword(b, b'E', OpConne)?,
        OpConne => keyword(b, b'C', OpConnec)?,
        OpConnec => keyword(b, b'T', OpConnect)?,
        OpConnect => separator(b, OpConnectSpc)?,
        OpConnectSpc => {
            if is_separator(b) {
                OpConnectSpc
            } else if b == b'{' {
                handler.parse_state().begin_span(ConnectArg, i);
                return arg_byte(handler, chunk, i);
            } else {
                return Err(Error::UnknownProtocolOperation);
            }
        }

        OpP => match b.to_ascii_uppercase() {
            b'I' => OpPi,
            b'O' => OpPo,
            b'U' => OpPu,
            _ => return Err(Error::UnknownProtocolOperation),
        },
        OpPi => keyword(b, b'N', OpPin)?,
        OpPin => keyword(b, b'G', OpPing)?,
        OpPing => match b {
            b'\r' => OpPing,
            b'\n' => {
                handler.process_ping()?;
                handler.reset_parsing_vars();
                return Ok(());
            }
            _ => return Err(Error::UnknownProtocolOperation),
        },
        OpPo => keyword(b, b'N', OpPon)?,
        OpPon => keyword(b, b'G', OpPong)?,
        OpPong => match b {
            b'\r' => OpPong,
            b'\n' => {
                handler.process_pong()?;
                handler.reset_parsing_vars();
                return Ok(());
            }
            _ => return Err(Error::UnknownProtocolOperation),
        },
        OpPu => keyword(b, b'B', OpPub)?,
        OpPub => separator(b, OpPubSpc)?,
        OpS => keyword(b, b'U', OpSu)?,
        OpSu => keyword(b, b'B', OpSub)?,
        OpSub => separator(b, OpSubSpc)?,
        OpU => keyword(b, b'N', OpUn)?,
        OpUn => keyword(b, b'S', OpUns)?,
        OpUns => keyword(b, b'U', OpUnsu)?,
        OpUnsu => keyword(b, b'B', OpUnsub)?,
        OpUnsub => separator(b, OpUnsubSpc)?,

        state @ (OpPubSpc | OpSubSpc | OpUnsubSpc) => {
            if is_separator(b) {
                state
            } else {
                let arg_state = match state {
                    OpPubSpc => PubArg,
                    OpSubSpc => SubArg,
                    _ => UnsubArg,
                };
                handler.parse_state().begin_span(arg_state, i);
                return arg_byte(handler, chunk, i);
            }
        }

        ConnectArg | PubArg | SubArg | UnsubArg => return arg_byte(handler, chunk, i),

        MsgPayload => return payload_byte(handler, chunk, i),
        MsgEndR => {
            if b == b'\n' {
                return complete_payload(handler, chunk);
            }
            return Err(Error::MessageParse);
        }
    };

    handler.parse_state().state = next;
    Ok(())
}

/// Consume one byte of an argument line
fn arg_byte<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8], i: usize) -> Result<()> {
    let b = chunk[i];
    if b == b'\n' {
        return complete_arg(handler, chunk, i);
    }

    let ps = handler.parse_state();
    ps.drop = b == b'\r';
    if ps.buffered {
        if ps.arg_buf.len() >= ps.capacity {
            return Err(Error::MaximumArgumentSizeReached);
        }
        ps.arg_buf.push(b);
    } else if i - ps.start >= ps.capacity {
        return Err(Error::MaximumArgumentSizeReached);
    }

    Ok(())
}

/// An argument line terminated at `chunk[i]`
fn complete_arg<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8], i: usize) -> Result<()> {
    let (state, owned, range) = {
        let ps = handler.parse_state();
        let drop = usize::from(ps.drop);
        if ps.buffered {
            let buf = std::mem::take(&mut ps.arg_buf);
            let end = buf.len() - drop;
            (ps.state, Some(buf), 0..end)
        } else {
            (ps.state, None, ps.start..i - drop)
        }
    };

    let arg = match &owned {
        Some(buf) => &buf[range],
        None => &chunk[range],
    };
    let result = dispatch_arg(handler, state, arg, i);

    if let Some(mut buf) = owned {
        buf.clear();
        handler.parse_state().arg_buf = buf;
    }
    result
}

fn dispatch_arg<H: SessionHandler + ?Sized>(
    handler: &mut H,
    state: ParserState,
    arg: &[u8],
    i: usize,
) -> Result<()> {
    match state {
        ParserState::ConnectArg => {
            let options = ConnectOptions::parse(arg)?;
            handler.process_connect(options)?;
            handler.reset_parsing_vars();
        }
        ParserState::PubArg => {
            handler.process_pub_args(as_text(arg)?)?;
            handler
                .parse_state()
                .begin_span(ParserState::MsgPayload, i + 1);
        }
        ParserState::SubArg => {
            handler.process_sub(as_text(arg)?)?;
            handler.reset_parsing_vars();
        }
        ParserState::UnsubArg => {
            handler.process_unsub(as_text(arg)?)?;
            handler.reset_parsing_vars();
        }
        other => {
            return Err(Error::Unexpected(format!(
                "argument completed in state {:?}",
                other
            )))
        }
    }
    Ok(())
}

fn as_text(arg: &[u8]) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| Error::ArgumentParse)
}

/// Consume one payload byte
fn payload_byte<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8], i: usize) -> Result<()> {
    let b = chunk[i];
    let ps = handler.parse_state();

    match b {
        b'\r' => {
            ps.span_end = i;
            ps.state = ParserState::MsgEndR;
        }
        b'\n' => {
            ps.span_end = i;
            return complete_payload(handler, chunk);
        }
        _ => {
            if ps.buffered {
                if ps.msg_buf.len() >= ps.capacity {
                    return Err(Error::MaximumMessageSizeReached);
                }
                ps.msg_buf.push(b);
            } else if i - ps.start >= ps.capacity {
                return Err(Error::MaximumMessageSizeReached);
            }
        }
    }

    Ok(())
}

/// The payload terminator was seen; validate the size and publish
fn complete_payload<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8]) -> Result<()> {
    let (expected, owned, range) = {
        let ps = handler.parse_state();
        if ps.buffered {
            let buf = std::mem::take(&mut ps.msg_buf);
            let end = buf.len();
            (ps.payload_size, Some(buf), 0..end)
        } else {
            (ps.payload_size, None, ps.start..ps.span_end)
        }
    };

    let payload = match &owned {
        Some(buf) => &buf[range],
        None => &chunk[range],
    };

    let result = if payload.len() != expected {
        Err(Error::PayloadSizeMismatch {
            expected,
            actual: payload.len(),
        })
    } else {
        handler.process_pub(payload)
    };

    if let Some(mut buf) = owned {
        buf.clear();
        handler.parse_state().msg_buf = buf;
    }

    result?;
    handler.reset_parsing_vars();
    Ok(())
}

/// Copy an unterminated argument or payload out of the chunk before it goes away
fn stash_partial<H: SessionHandler + ?Sized>(handler: &mut H, chunk: &[u8]) {
    let ps = handler.parse_state();
    if ps.buffered {
        return;
    }

    match ps.state {
        ParserState::ConnectArg
        | ParserState::PubArg
        | ParserState::SubArg
        | ParserState::UnsubArg => {
            ps.arg_buf.extend_from_slice(&chunk[ps.start..]);
            ps.buffered = true;
        }
        ParserState::MsgPayload => {
            ps.msg_buf.extend_from_slice(&chunk[ps.start..]);
            ps.buffered = true;
        }
        ParserState::MsgEndR => {
            ps.msg_buf.extend_from_slice(&chunk[ps.start..ps.span_end]);
            ps.buffered = true;
        }
        _ => {}
    }
}
