use crate::error::{Concept2Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;

/// Size of an outbound wire record in bytes
pub const WIRE_RECORD_SIZE: usize = 22;

/// Largest payload that fits behind the record id byte
pub const MAX_PAYLOAD_SIZE: usize = WIRE_RECORD_SIZE - 1;

/// Largest CSAFE frame accepted by the monitor, flags included
pub const MAX_FRAME_SIZE: usize = 120;

/// Start flag of an extended (addressed) frame
pub const EXTENDED_START_FLAG: u8 = 0xF0;

/// Start flag of a standard frame
pub const STANDARD_START_FLAG: u8 = 0xF1;

/// Stop flag terminating every frame
pub const STOP_FLAG: u8 = 0xF2;

/// Byte-stuffing escape flag
pub const STUFF_FLAG: u8 = 0xF3;

/// Strip the HID report id from an inbound record
///
/// The first byte of every record delivered by the transport is the report
/// id; the remainder is the payload. An empty record yields an empty payload.
#[must_use]
pub fn strip_report_id(record: &Bytes) -> Bytes {
    if record.is_empty() {
        Bytes::new()
    } else {
        record.slice(1..)
    }
}

/// Fixed-size outbound record written to the transport
///
/// Layout:
/// - Byte 0: record id (HID report id, 1 by default)
/// - Bytes 1..=N: payload, left aligned
/// - Remaining bytes: zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    buffer: Bytes,
}

impl WireRecord {
    /// Build a wire record from a record id and payload
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::PayloadTooLarge`] if the payload does not fit
    /// behind the record id byte.
    pub fn new(record_id: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Concept2Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(WIRE_RECORD_SIZE);
        buf.put_u8(record_id);
        buf.extend_from_slice(payload);
        buf.resize(WIRE_RECORD_SIZE, 0);

        Ok(Self {
            buffer: buf.freeze(),
        })
    }

    /// Record id stored in the first byte
    #[must_use]
    pub fn record_id(&self) -> u8 {
        self.buffer[0]
    }

    /// Full record as written to the transport
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the record, returning its bytes
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buffer
    }
}

/// A complete CSAFE frame
///
/// Holds the raw bytes as seen on the wire (start flag through stop flag,
/// byte-stuffed) alongside the unstuffed contents. The adapter treats frames
/// as opaque units; the accessors exist for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    buffer: Bytes,
    contents: Bytes,
    addresses: Option<(u8, u8)>,
}

impl Frame {
    /// Build a standard frame around the given contents
    ///
    /// The contents are byte-stuffed and followed by their XOR checksum.
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::InvalidParameters`] if the encoded frame
    /// would exceed [`MAX_FRAME_SIZE`].
    pub fn standard(contents: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(contents.len() + 3);
        buf.put_u8(STANDARD_START_FLAG);
        Self::finish(buf, contents, None)
    }

    /// Build an extended frame addressed from `source` to `destination`
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::InvalidParameters`] if the encoded frame
    /// would exceed [`MAX_FRAME_SIZE`].
    pub fn extended(destination: u8, source: u8, contents: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(contents.len() + 5);
        buf.put_u8(EXTENDED_START_FLAG);
        stuff_byte(&mut buf, destination);
        stuff_byte(&mut buf, source);
        Self::finish(buf, contents, Some((destination, source)))
    }

    fn finish(mut buf: BytesMut, contents: &[u8], addresses: Option<(u8, u8)>) -> Result<Self> {
        for &byte in contents {
            stuff_byte(&mut buf, byte);
        }
        stuff_byte(&mut buf, checksum(contents));
        buf.put_u8(STOP_FLAG);

        if buf.len() > MAX_FRAME_SIZE {
            return Err(Concept2Error::InvalidParameters(format!(
                "Encoded frame is {} bytes, limit is {MAX_FRAME_SIZE}",
                buf.len()
            )));
        }

        Ok(Self {
            buffer: buf.freeze(),
            contents: Bytes::copy_from_slice(contents),
            addresses,
        })
    }

    /// Parse and validate a raw frame, flags included
    ///
    /// # Errors
    ///
    /// Returns [`Concept2Error::Decode`] if the flags, byte stuffing or
    /// checksum are invalid.
    pub fn parse(raw: impl Into<Bytes>) -> Result<Self> {
        let buffer = raw.into();

        if buffer.len() < 3 {
            return Err(Concept2Error::Decode(format!(
                "Frame too short: {} bytes",
                buffer.len()
            )));
        }

        let extended = match buffer[0] {
            EXTENDED_START_FLAG => true,
            STANDARD_START_FLAG => false,
            other => {
                return Err(Concept2Error::Decode(format!(
                    "Invalid start flag: {other:02X}"
                )))
            }
        };

        if buffer[buffer.len() - 1] != STOP_FLAG {
            return Err(Concept2Error::Decode(
                "Frame is missing its stop flag".to_string(),
            ));
        }

        let body = unstuff(&buffer[1..buffer.len() - 1])?;
        let header_len = if extended { 2 } else { 0 };
        if body.len() < header_len + 1 {
            return Err(Concept2Error::Decode(
                "Frame is missing its checksum".to_string(),
            ));
        }

        let addresses = extended.then(|| (body[0], body[1]));
        let (contents, expected) = body[header_len..].split_at(body.len() - header_len - 1);
        let computed = checksum(contents);
        if computed != expected[0] {
            return Err(Concept2Error::Decode(format!(
                "Checksum mismatch: frame carries {:02X}, contents give {computed:02X}",
                expected[0]
            )));
        }

        Ok(Self {
            buffer,
            contents: Bytes::copy_from_slice(contents),
            addresses,
        })
    }

    /// Raw frame bytes as seen on the wire
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Raw frame buffer
    #[must_use]
    pub const fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Unstuffed frame contents, without addresses or checksum
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Destination and source addresses of an extended frame
    #[must_use]
    pub const fn addresses(&self) -> Option<(u8, u8)> {
        self.addresses
    }

    /// Check if this is an extended (addressed) frame
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        self.addresses.is_some()
    }

    /// Length of the raw frame in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the raw frame is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

fn checksum(contents: &[u8]) -> u8 {
    contents.iter().fold(0, |acc, byte| acc ^ byte)
}

fn stuff_byte(buf: &mut BytesMut, byte: u8) {
    if (EXTENDED_START_FLAG..=STUFF_FLAG).contains(&byte) {
        buf.put_u8(STUFF_FLAG);
        buf.put_u8(byte - EXTENDED_START_FLAG);
    } else {
        buf.put_u8(byte);
    }
}

fn unstuff(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();

    while let Some(byte) = bytes.next() {
        match byte {
            STUFF_FLAG => match bytes.next() {
                Some(code @ 0..=3) => out.push(EXTENDED_START_FLAG + code),
                Some(code) => {
                    return Err(Concept2Error::Decode(format!(
                        "Invalid byte-stuffing sequence: F3 {code:02X}"
                    )))
                }
                None => {
                    return Err(Concept2Error::Decode(
                        "Byte-stuffing flag at end of frame".to_string(),
                    ))
                }
            },
            EXTENDED_START_FLAG | STANDARD_START_FLAG | STOP_FLAG => {
                return Err(Concept2Error::Decode(format!(
                    "Unexpected flag byte {byte:02X} inside frame"
                )))
            }
            _ => out.push(byte),
        }
    }

    Ok(out)
}

/// Incremental frame decoder fed with report payloads
///
/// Implementations buffer partial frames across calls to [`read`] and hand
/// out every completed frame, or decode failure, through [`next_frame`] in
/// the order they were recognised.
///
/// [`read`]: FrameDecoder::read
/// [`next_frame`]: FrameDecoder::next_frame
pub trait FrameDecoder: Send {
    /// Append bytes to the reassembly state
    fn read(&mut self, data: &[u8]);

    /// Take the next decoded frame or decode error, if any
    fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// Drop any partial frame and pending output
    fn reset(&mut self);
}

/// Default CSAFE frame reader
///
/// Bytes outside a frame (report padding) are skipped. A frame starts at a
/// start flag and ends at the next stop flag; a start flag inside an open
/// frame, an oversized frame or a frame failing validation is reported as a
/// [`Concept2Error::Decode`] and the reader resynchronises.
pub struct FrameReader {
    buffer: BytesMut,
    in_frame: bool,
    max_frame_size: usize,
    ready: VecDeque<Result<Frame>>,
}

impl FrameReader {
    /// Create a reader limited to [`MAX_FRAME_SIZE`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a reader with a custom frame size limit
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_size),
            in_frame: false,
            max_frame_size,
            ready: VecDeque::new(),
        }
    }

    /// Check if a partial frame is buffered
    #[must_use]
    pub const fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Number of decoded results waiting to be taken
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    fn push_byte(&mut self, byte: u8) {
        match (self.in_frame, byte) {
            (false, EXTENDED_START_FLAG | STANDARD_START_FLAG) => {
                self.buffer.clear();
                self.buffer.put_u8(byte);
                self.in_frame = true;
            }
            (false, _) => {}
            (true, EXTENDED_START_FLAG | STANDARD_START_FLAG) => {
                self.ready.push_back(Err(Concept2Error::Decode(format!(
                    "Start flag inside unterminated frame after {} bytes",
                    self.buffer.len()
                ))));
                self.buffer.clear();
                self.buffer.put_u8(byte);
            }
            (true, STOP_FLAG) => {
                self.buffer.put_u8(byte);
                self.in_frame = false;
                let raw = self.buffer.split().freeze();
                self.ready.push_back(Frame::parse(raw));
            }
            (true, _) => {
                // Room must remain for the stop flag
                if self.buffer.len() + 2 > self.max_frame_size {
                    self.ready.push_back(Err(Concept2Error::Decode(format!(
                        "Frame exceeds {} bytes",
                        self.max_frame_size
                    ))));
                    self.buffer.clear();
                    self.in_frame = false;
                } else {
                    self.buffer.put_u8(byte);
                }
            }
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for FrameReader {
    fn read(&mut self, data: &[u8]) {
        for &byte in data {
            self.push_byte(byte);
        }
    }

    fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.ready.pop_front()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
        self.ready.clear();
    }
}
