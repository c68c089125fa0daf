//! Incremental JSON value reader.
//!
//! Pulls one JSON value at a time off a long-lived inbound stream. Values are
//! delimited structurally, not by length, so the reader has to stop on the
//! last byte of each value: anything after it belongs to the next message.
//!
//! Objects, arrays, strings and literals are parsed straight off the buffered
//! stream by `serde_json`, which stops on their closing byte. A top-level
//! number has no closing byte, so it is scanned here up to its delimiter
//! without consuming the delimiter.

use crate::config::TransportConfig;
use crate::{Result, RpcError};
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, ErrorKind, Read};

/// Lifecycle of a [`ValueReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamReaderState {
    /// No value has been pulled yet.
    Uninitialized,
    /// At least one pull happened; never goes back.
    Active,
}

/// Reads consecutive JSON values from an inbound byte stream.
///
/// The reader owns the stream for its whole lifetime and never closes it
/// between values.
pub struct ValueReader<R> {
    input: BufReader<R>,
    state: StreamReaderState,
    peek: bool,
}

impl<R: Read> ValueReader<R> {
    /// Wrap an inbound stream.
    pub fn new(input: R) -> Self {
        Self::with_capacity(TransportConfig::READ_BUFFER_SIZE, input)
    }

    /// Wrap an inbound stream using a read buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize, input: R) -> Self {
        Self {
            input: BufReader::with_capacity(capacity, input),
            state: StreamReaderState::Uninitialized,
            peek: true,
        }
    }

    /// Enable or disable the end-of-stream probe in [`assert_readable`].
    ///
    /// [`assert_readable`]: ValueReader::assert_readable
    pub fn with_peek(mut self, enabled: bool) -> Self {
        self.peek = enabled;
        self
    }

    pub fn state(&self) -> StreamReaderState {
        self.state
    }

    /// Read the next value, leaving the stream right after its last byte.
    ///
    /// Fails with [`RpcError::StreamEnded`] when the stream ends before any
    /// byte of a value, and with [`RpcError::StreamRead`] on I/O failure or
    /// malformed input. After `StreamEnded` a later call tries again.
    pub fn next_value(&mut self) -> Result<Value> {
        self.state = StreamReaderState::Active;

        let first = match self.skip_whitespace()? {
            Some(byte) => byte,
            None => return Err(RpcError::StreamEnded),
        };

        if first == b'-' || first.is_ascii_digit() {
            return self.read_number();
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.input);
        Value::deserialize(&mut de).map_err(RpcError::from_codec)
    }

    /// Probe for end-of-stream without consuming anything.
    ///
    /// Blocks until at least one byte is buffered or the stream reports its
    /// end. With peeking disabled this is a no-op.
    pub fn assert_readable(&mut self) -> Result<()> {
        if !self.peek {
            return Ok(());
        }
        loop {
            match self.input.fill_buf() {
                Ok(buf) if buf.is_empty() => return Err(RpcError::StreamEnded),
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(RpcError::stream_read(e)),
            }
        }
    }

    /// Unwrap the buffered stream, including any bytes not yet parsed.
    pub fn into_inner(self) -> BufReader<R> {
        self.input
    }

    /// Consume inter-value whitespace and peek the first byte of the next
    /// value. Returns `None` at end-of-stream.
    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            let buf = match self.input.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(RpcError::stream_read(e)),
            };
            if buf.is_empty() {
                return Ok(None);
            }

            let skip = buf.iter().take_while(|b| is_whitespace(**b)).count();
            if skip < buf.len() {
                let first = buf[skip];
                self.input.consume(skip);
                return Ok(Some(first));
            }
            let len = buf.len();
            self.input.consume(len);
        }
    }

    fn read_number(&mut self) -> Result<Value> {
        let mut literal = Vec::new();
        loop {
            let buf = match self.input.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(RpcError::stream_read(e)),
            };
            if buf.is_empty() {
                break;
            }

            let taken = buf.iter().take_while(|b| is_number_byte(**b)).count();
            literal.extend_from_slice(&buf[..taken]);
            let delimited = taken < buf.len();
            self.input.consume(taken);

            if literal.len() > TransportConfig::MAX_NUMBER_LITERAL_LEN {
                return Err(RpcError::StreamRead {
                    message: format!(
                        "number literal exceeds {} bytes",
                        TransportConfig::MAX_NUMBER_LITERAL_LEN
                    ),
                    source: None,
                });
            }
            if delimited {
                break;
            }
        }
        serde_json::from_slice(&literal).map_err(RpcError::from_codec)
    }
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\n' | b'\r' | b'\t')
}

fn is_number_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}
