//! OSC 1.0 binary message codec.
//!
//! Layout of a message:
//! - Address pattern: ASCII, NUL terminated, padded to a multiple of 4 bytes
//! - Type tag string: `,` followed by one tag per argument, padded the same way
//! - Arguments: `i` int32 BE, `f` float32 BE, `s` padded string, `b` size-prefixed
//!   padded blob, `T`/`F` booleans with no payload
//!
//! A bundle is the padded string `#bundle`, a 64-bit time tag, then a sequence
//! of size-prefixed elements, each a message or a nested bundle.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, TrackingError};

/// Largest datagram accepted on the receive side.
pub const MAX_PACKET_SIZE: usize = 65_507;

const BUNDLE_TAG: &str = "#bundle";

/// Deepest bundle nesting accepted on decode.
pub const MAX_BUNDLE_DEPTH: usize = 16;

/// One typed argument of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl OscArg {
    fn tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::Str(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Bool(true) => 'T',
            OscArg::Bool(false) => 'F',
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{}", v),
            OscArg::Float(v) => write!(f, "{}", v),
            OscArg::Str(v) => write!(f, "{}", v),
            OscArg::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
            OscArg::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// An address plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_int(mut self, value: i32) -> Self {
        self.args.push(OscArg::Int(value));
        self
    }

    pub fn with_float(mut self, value: f32) -> Self {
        self.args.push(OscArg::Float(value));
        self
    }

    pub fn push(&mut self, arg: OscArg) {
        self.args.push(arg);
    }

    /// Serializes the message into a datagram payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    fn encoded_len(&self) -> usize {
        let tags = 1 + self.args.len();
        let payload: usize = self
            .args
            .iter()
            .map(|arg| match arg {
                OscArg::Int(_) | OscArg::Float(_) => 4,
                OscArg::Str(s) => padded_len(s.len() + 1),
                OscArg::Blob(b) => 4 + padded_len(b.len()),
                OscArg::Bool(_) => 0,
            })
            .sum();
        padded_len(self.address.len() + 1) + padded_len(tags + 1) + payload
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        put_padded_str(buf, &self.address);
        let tags: String = std::iter::once(',').chain(self.args.iter().map(OscArg::tag)).collect();
        put_padded_str(buf, &tags);
        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Str(s) => put_padded_str(buf, s),
                OscArg::Blob(b) => {
                    buf.put_u32(b.len() as u32);
                    buf.put_slice(b);
                    buf.put_bytes(0, padded_len(b.len()) - b.len());
                }
                OscArg::Bool(_) => {}
            }
        }
    }
}

/// Space-separated rendering used in logs, e.g. `/ContourTracking/Threshold 40`.
impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle { time_tag: u64, content: Vec<OscPacket> },
}

impl OscPacket {
    /// Parses one datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let packet = decode_packet(&mut buf, 0)?;
        if buf.has_remaining() {
            return Err(TrackingError::decode(format!("{} trailing bytes", buf.remaining())));
        }
        Ok(packet)
    }

    /// Flattens bundles into their messages, in order.
    pub fn into_messages(self) -> Vec<OscMessage> {
        match self {
            OscPacket::Message(message) => vec![message],
            OscPacket::Bundle { content, .. } => content.into_iter().flat_map(OscPacket::into_messages).collect(),
        }
    }

    /// Serializes the packet into a datagram payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_packet(self, &mut buf);
        buf.to_vec()
    }
}

fn encode_packet(packet: &OscPacket, buf: &mut BytesMut) {
    match packet {
        OscPacket::Message(message) => message.encode_into(buf),
        OscPacket::Bundle { time_tag, content } => {
            put_padded_str(buf, BUNDLE_TAG);
            buf.put_u64(*time_tag);
            for element in content {
                let mut inner = BytesMut::new();
                encode_packet(element, &mut inner);
                buf.put_u32(inner.len() as u32);
                buf.put_slice(&inner);
            }
        }
    }
}

fn decode_packet(buf: &mut &[u8], depth: usize) -> Result<OscPacket> {
    if buf.starts_with(b"#bundle\0") {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(TrackingError::decode(format!(
                "bundles nested deeper than {}",
                MAX_BUNDLE_DEPTH
            )));
        }
        buf.advance(8);
        ensure_remaining(buf, 8, "bundle time tag")?;
        let time_tag = buf.get_u64();
        let mut content = Vec::new();
        while buf.has_remaining() {
            ensure_remaining(buf, 4, "bundle element size")?;
            let size = buf.get_u32() as usize;
            ensure_remaining(buf, size, "bundle element")?;
            let mut element = &buf[..size];
            content.push(decode_packet(&mut element, depth + 1)?);
            if element.has_remaining() {
                return Err(TrackingError::decode("bundle element has trailing bytes"));
            }
            buf.advance(size);
        }
        return Ok(OscPacket::Bundle { time_tag, content });
    }
    decode_message(buf).map(OscPacket::Message)
}

fn decode_message(buf: &mut &[u8]) -> Result<OscMessage> {
    let address = get_padded_str(buf)?;
    if !address.starts_with('/') {
        return Err(TrackingError::decode(format!("address {:?} does not start with '/'", address)));
    }
    // Very old senders omit the type tag string entirely.
    if !buf.has_remaining() {
        return Ok(OscMessage::new(address));
    }
    let tags = get_padded_str(buf)?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(TrackingError::decode("type tag string does not start with ','"));
    };

    let mut message = OscMessage::new(address);
    for tag in tags.chars() {
        let arg = match tag {
            'i' => {
                ensure_remaining(buf, 4, "int32 argument")?;
                OscArg::Int(buf.get_i32())
            }
            'f' => {
                ensure_remaining(buf, 4, "float32 argument")?;
                OscArg::Float(buf.get_f32())
            }
            's' => OscArg::Str(get_padded_str(buf)?),
            'b' => {
                ensure_remaining(buf, 4, "blob size")?;
                let size = buf.get_u32() as usize;
                let padded = padded_len(size);
                ensure_remaining(buf, padded, "blob")?;
                let blob = buf[..size].to_vec();
                buf.advance(padded);
                OscArg::Blob(blob)
            }
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            other => return Err(TrackingError::decode(format!("unsupported type tag '{}'", other))),
        };
        message.push(arg);
    }
    Ok(message)
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    let total = padded_len(s.len() + 1);
    buf.put_bytes(0, total - s.len());
}

fn get_padded_str(buf: &mut &[u8]) -> Result<String> {
    let Some(end) = buf.iter().position(|&b| b == 0) else {
        return Err(TrackingError::decode("unterminated string"));
    };
    let total = padded_len(end + 1);
    ensure_remaining(buf, total, "string padding")?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| TrackingError::decode("string is not valid UTF-8"))?
        .to_string();
    buf.advance(total);
    Ok(s)
}

fn ensure_remaining(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(TrackingError::decode(format!(
            "{}: expected {} bytes, got {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}
