//! OSC 1.0 packet codec
//!
//! Only what TUIO needs: messages and (nested) bundles with the standard and
//! common non-standard argument types. All numbers are big-endian and every
//! string, blob and type tag list is padded to a multiple of four bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use thiserror::Error;

const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Deepest bundle nesting accepted by [`decode_packet`]
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Errors that can occur while decoding or encoding OSC packets
#[derive(Error, Debug)]
pub enum OscError {
    #[error("Packet truncated at offset {0}")]
    Truncated(u64),

    #[error("Unterminated string at offset {0}")]
    UnterminatedString(u64),

    #[error("Invalid OSC address: {0:?}")]
    InvalidAddress(String),

    #[error("Missing type tag string")]
    MissingTypeTags,

    #[error("Unknown type tag '{0}'")]
    UnknownTypeTag(char),

    #[error("Invalid bundle element size {0}")]
    InvalidElementSize(i32),

    #[error("Bundles nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// NTP-style time tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OscTime {
    pub seconds: u32,
    pub fractional: u32,
}

impl OscTime {
    /// The special "immediately" time tag
    pub const IMMEDIATE: OscTime = OscTime {
        seconds: 0,
        fractional: 1,
    };
}

/// One OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscType {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    Time(OscTime),
    Bool(bool),
    Nil,
    Inf,
}

impl OscType {
    fn tag(&self) -> u8 {
        match self {
            OscType::Int(_) => b'i',
            OscType::Float(_) => b'f',
            OscType::String(_) => b's',
            OscType::Blob(_) => b'b',
            OscType::Long(_) => b'h',
            OscType::Double(_) => b'd',
            OscType::Time(_) => b't',
            OscType::Bool(true) => b'T',
            OscType::Bool(false) => b'F',
            OscType::Nil => b'N',
            OscType::Inf => b'I',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            OscType::Int(v) => Some(v),
            OscType::Long(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Numeric argument as f32; TUIO senders mix `i`, `f` and `d`
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            OscType::Float(v) => Some(v),
            OscType::Double(v) => Some(v as f32),
            OscType::Int(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscType::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscType>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>, args: Vec<OscType>) -> Self {
        Self {
            addr: addr.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: OscTime,
    pub content: Vec<OscPacket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Visit every message in the packet, descending into bundles in order
    pub fn for_each_message<F: FnMut(&OscMessage)>(&self, f: &mut F) {
        match self {
            OscPacket::Message(msg) => f(msg),
            OscPacket::Bundle(bundle) => {
                for packet in &bundle.content {
                    packet.for_each_message(f);
                }
            }
        }
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn truncated(reader: &Cursor<&[u8]>) -> impl FnOnce(std::io::Error) -> OscError {
    let position = reader.position();
    move |e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            OscError::Truncated(position)
        } else {
            OscError::Io(e)
        }
    }
}

fn skip_padding(reader: &mut Cursor<&[u8]>, len: usize) -> Result<(), OscError> {
    let pad = padded_len(len) - len;
    let mut scratch = [0u8; 3];
    reader
        .read_exact(&mut scratch[..pad])
        .map_err(truncated(reader))
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String, OscError> {
    let start = reader.position();
    let data: &[u8] = reader.get_ref();
    let rest = data.get(start as usize..).unwrap_or_default();
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::UnterminatedString(start))?;
    let value = String::from_utf8_lossy(&rest[..len]).into_owned();
    // Terminator plus padding up to the next 4-byte boundary
    let total = padded_len(len + 1);
    if rest.len() < total {
        return Err(OscError::Truncated(start));
    }
    reader.set_position(start + total as u64);
    Ok(value)
}

fn read_blob(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>, OscError> {
    let len = reader.read_i32::<BigEndian>().map_err(truncated(reader))?;
    let len = usize::try_from(len).map_err(|_| OscError::InvalidElementSize(len))?;
    let remaining = reader.get_ref().len() as u64 - reader.position();
    if len as u64 > remaining {
        return Err(OscError::Truncated(reader.position()));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(truncated(reader))?;
    skip_padding(reader, len)?;
    Ok(data)
}

fn read_time(reader: &mut Cursor<&[u8]>) -> Result<OscTime, OscError> {
    Ok(OscTime {
        seconds: reader.read_u32::<BigEndian>().map_err(truncated(reader))?,
        fractional: reader.read_u32::<BigEndian>().map_err(truncated(reader))?,
    })
}

fn read_arg(reader: &mut Cursor<&[u8]>, tag: u8) -> Result<OscType, OscError> {
    let arg = match tag {
        b'i' => OscType::Int(reader.read_i32::<BigEndian>().map_err(truncated(reader))?),
        b'f' => OscType::Float(reader.read_f32::<BigEndian>().map_err(truncated(reader))?),
        b's' | b'S' => OscType::String(read_string(reader)?),
        b'b' => OscType::Blob(read_blob(reader)?),
        b'h' => OscType::Long(reader.read_i64::<BigEndian>().map_err(truncated(reader))?),
        b'd' => OscType::Double(reader.read_f64::<BigEndian>().map_err(truncated(reader))?),
        b't' => OscType::Time(read_time(reader)?),
        b'T' => OscType::Bool(true),
        b'F' => OscType::Bool(false),
        b'N' => OscType::Nil,
        b'I' => OscType::Inf,
        other => return Err(OscError::UnknownTypeTag(other as char)),
    };
    Ok(arg)
}

fn read_message(reader: &mut Cursor<&[u8]>) -> Result<OscMessage, OscError> {
    let addr = read_string(reader)?;
    if !addr.starts_with('/') {
        return Err(OscError::InvalidAddress(addr));
    }

    // Very old senders omit the type tag string entirely
    if reader.position() as usize == reader.get_ref().len() {
        return Ok(OscMessage { addr, args: Vec::new() });
    }

    let tags = read_string(reader)?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::MissingTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.bytes() {
        args.push(read_arg(reader, tag)?);
    }
    Ok(OscMessage { addr, args })
}

fn read_bundle(reader: &mut Cursor<&[u8]>, depth: usize) -> Result<OscBundle, OscError> {
    if depth > MAX_BUNDLE_DEPTH {
        return Err(OscError::NestingTooDeep(MAX_BUNDLE_DEPTH));
    }

    let mut header = [0u8; 8];
    reader.read_exact(&mut header).map_err(truncated(reader))?;
    let timetag = read_time(reader)?;

    let mut content = Vec::new();
    let data = *reader.get_ref();
    while (reader.position() as usize) < data.len() {
        let size = reader.read_i32::<BigEndian>().map_err(truncated(reader))?;
        let start = reader.position() as usize;
        let len = usize::try_from(size)
            .ok()
            .filter(|len| len % 4 == 0 && start + len <= data.len())
            .ok_or(OscError::InvalidElementSize(size))?;
        content.push(decode_nested(&data[start..start + len], depth)?);
        reader.set_position((start + len) as u64);
    }
    Ok(OscBundle { timetag, content })
}

/// Decode one OSC packet from a datagram
pub fn decode_packet(data: &[u8]) -> Result<OscPacket, OscError> {
    decode_nested(data, 0)
}

fn decode_nested(data: &[u8], depth: usize) -> Result<OscPacket, OscError> {
    let mut reader = Cursor::new(data);
    if data.starts_with(BUNDLE_TAG) {
        Ok(OscPacket::Bundle(read_bundle(&mut reader, depth + 1)?))
    } else {
        Ok(OscPacket::Message(read_message(&mut reader)?))
    }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), OscError> {
    let bytes = value.as_bytes();
    writer.write_all(bytes)?;
    let padding = padded_len(bytes.len() + 1) - bytes.len();
    writer.write_all(&[0u8; 4][..padding])?;
    Ok(())
}

fn write_arg<W: Write>(writer: &mut W, arg: &OscType) -> Result<(), OscError> {
    match arg {
        OscType::Int(v) => writer.write_i32::<BigEndian>(*v)?,
        OscType::Float(v) => writer.write_f32::<BigEndian>(*v)?,
        OscType::String(s) => write_string(writer, s)?,
        OscType::Blob(data) => {
            let len = i32::try_from(data.len()).map_err(|_| OscError::InvalidElementSize(-1))?;
            writer.write_i32::<BigEndian>(len)?;
            writer.write_all(data)?;
            writer.write_all(&[0u8; 3][..padded_len(data.len()) - data.len()])?;
        }
        OscType::Long(v) => writer.write_i64::<BigEndian>(*v)?,
        OscType::Double(v) => writer.write_f64::<BigEndian>(*v)?,
        OscType::Time(t) => {
            writer.write_u32::<BigEndian>(t.seconds)?;
            writer.write_u32::<BigEndian>(t.fractional)?;
        }
        OscType::Bool(_) | OscType::Nil | OscType::Inf => {}
    }
    Ok(())
}

/// Write one OSC packet
pub fn write_packet<W: Write>(writer: &mut W, packet: &OscPacket) -> Result<(), OscError> {
    match packet {
        OscPacket::Message(msg) => {
            write_string(writer, &msg.addr)?;
            let mut tags = String::with_capacity(msg.args.len() + 1);
            tags.push(',');
            tags.extend(msg.args.iter().map(|a| a.tag() as char));
            write_string(writer, &tags)?;
            for arg in &msg.args {
                write_arg(writer, arg)?;
            }
        }
        OscPacket::Bundle(bundle) => {
            writer.write_all(BUNDLE_TAG)?;
            writer.write_u32::<BigEndian>(bundle.timetag.seconds)?;
            writer.write_u32::<BigEndian>(bundle.timetag.fractional)?;
            for element in &bundle.content {
                let encoded = encode_packet(element)?;
                let size = i32::try_from(encoded.len())
                    .map_err(|_| OscError::InvalidElementSize(-1))?;
                writer.write_i32::<BigEndian>(size)?;
                writer.write_all(&encoded)?;
            }
        }
    }
    Ok(())
}

/// Encode one OSC packet into a new buffer
pub fn encode_packet(packet: &OscPacket) -> Result<Vec<u8>, OscError> {
    let mut buf = Vec::new();
    write_packet(&mut buf, packet)?;
    Ok(buf)
}
