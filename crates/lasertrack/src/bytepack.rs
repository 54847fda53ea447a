//! Little-endian primitive codec shared by the tracking wire formats
//!
//! Every function works on a caller-owned buffer and an in/out byte cursor so
//! that a sequence of pack or unpack calls can walk one buffer. Packing never
//! writes a partial value: if the whole value does not fit, the buffer and the
//! cursor are left untouched. Strings are Latin-1 on the wire, one byte per
//! character.

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{Quaternion, Vector2, Vector3};
use thiserror::Error;

/// Replacement byte for characters outside the Latin-1 range
const LATIN1_REPLACEMENT: u8 = b'?';

/// Error returned when a value does not fit into the remaining buffer space
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    #[error("Not enough space to pack value: need {needed} bytes, {available} available")]
    OutOfSpace { needed: usize, available: usize },
}

/// Error returned when the buffer ends before a value is complete
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
    #[error("Unexpected end of buffer at offset {offset}: need {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },
}

fn reserve<'a>(
    buf: &'a mut [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a mut [u8], PackError> {
    let available = buf.len().saturating_sub(*cursor);
    if len > available {
        return Err(PackError::OutOfSpace {
            needed: len,
            available,
        });
    }
    let start = *cursor;
    *cursor += len;
    Ok(&mut buf[start..start + len])
}

fn take<'a>(buf: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], UnpackError> {
    let available = buf.len().saturating_sub(*cursor);
    if len > available {
        return Err(UnpackError::UnexpectedEof {
            offset: *cursor,
            needed: len - available,
        });
    }
    let start = *cursor;
    *cursor += len;
    Ok(&buf[start..start + len])
}

fn to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(LATIN1_REPLACEMENT))
        .collect()
}

fn color_channel_to_byte(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

pub fn pack_u8(buf: &mut [u8], cursor: &mut usize, value: u8) -> Result<(), PackError> {
    reserve(buf, cursor, 1)?[0] = value;
    Ok(())
}

/// Pack a single character as one Latin-1 byte
pub fn pack_char(buf: &mut [u8], cursor: &mut usize, value: char) -> Result<(), PackError> {
    let byte = u8::try_from(u32::from(value)).unwrap_or(LATIN1_REPLACEMENT);
    pack_u8(buf, cursor, byte)
}

/// Pack a string followed by a terminating zero byte
pub fn pack_null_terminated_string(
    buf: &mut [u8],
    cursor: &mut usize,
    value: &str,
) -> Result<(), PackError> {
    let bytes = to_latin1(value);
    let dst = reserve(buf, cursor, bytes.len() + 1)?;
    dst[..bytes.len()].copy_from_slice(&bytes);
    dst[bytes.len()] = 0;
    Ok(())
}

/// Pack a string without length prefix or terminator
pub fn pack_string(buf: &mut [u8], cursor: &mut usize, value: &str) -> Result<(), PackError> {
    let bytes = to_latin1(value);
    reserve(buf, cursor, bytes.len())?.copy_from_slice(&bytes);
    Ok(())
}

pub fn pack_i32(buf: &mut [u8], cursor: &mut usize, value: i32) -> Result<(), PackError> {
    LittleEndian::write_i32(reserve(buf, cursor, 4)?, value);
    Ok(())
}

pub fn pack_u32(buf: &mut [u8], cursor: &mut usize, value: u32) -> Result<(), PackError> {
    LittleEndian::write_u32(reserve(buf, cursor, 4)?, value);
    Ok(())
}

pub fn pack_i64(buf: &mut [u8], cursor: &mut usize, value: i64) -> Result<(), PackError> {
    LittleEndian::write_i64(reserve(buf, cursor, 8)?, value);
    Ok(())
}

pub fn pack_f32(buf: &mut [u8], cursor: &mut usize, value: f32) -> Result<(), PackError> {
    LittleEndian::write_f32(reserve(buf, cursor, 4)?, value);
    Ok(())
}

pub fn pack_f64(buf: &mut [u8], cursor: &mut usize, value: f64) -> Result<(), PackError> {
    LittleEndian::write_f64(reserve(buf, cursor, 8)?, value);
    Ok(())
}

pub fn pack_vector2(
    buf: &mut [u8],
    cursor: &mut usize,
    value: &Vector2<f32>,
) -> Result<(), PackError> {
    LittleEndian::write_f32_into(value.as_slice(), reserve(buf, cursor, 8)?);
    Ok(())
}

pub fn pack_vector3(
    buf: &mut [u8],
    cursor: &mut usize,
    value: &Vector3<f32>,
) -> Result<(), PackError> {
    LittleEndian::write_f32_into(value.as_slice(), reserve(buf, cursor, 12)?);
    Ok(())
}

/// Pack a quaternion in x, y, z, w order
pub fn pack_quaternion(
    buf: &mut [u8],
    cursor: &mut usize,
    value: &Quaternion<f32>,
) -> Result<(), PackError> {
    let xyzw = [value.i, value.j, value.k, value.w];
    LittleEndian::write_f32_into(&xyzw, reserve(buf, cursor, 16)?);
    Ok(())
}

/// Pack an RGB color given as floats in [0, 1] as three bytes
pub fn pack_color(buf: &mut [u8], cursor: &mut usize, rgb: [f32; 3]) -> Result<(), PackError> {
    let dst = reserve(buf, cursor, 3)?;
    for (byte, channel) in dst.iter_mut().zip(rgb) {
        *byte = color_channel_to_byte(channel);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unpacking
// ---------------------------------------------------------------------------

pub fn unpack_u8(buf: &[u8], cursor: &mut usize) -> Result<u8, UnpackError> {
    Ok(take(buf, cursor, 1)?[0])
}

pub fn unpack_char(buf: &[u8], cursor: &mut usize) -> Result<char, UnpackError> {
    Ok(char::from(unpack_u8(buf, cursor)?))
}

/// Unpack characters up to (and consuming) the next zero byte
pub fn unpack_null_terminated_string(
    buf: &[u8],
    cursor: &mut usize,
) -> Result<String, UnpackError> {
    let rest = buf.get(*cursor..).unwrap_or_default();
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(UnpackError::UnexpectedEof {
            offset: *cursor,
            needed: 1,
        })?;
    let bytes = take(buf, cursor, len + 1)?;
    Ok(bytes[..len].iter().map(|&b| char::from(b)).collect())
}

/// Unpack exactly `char_count` Latin-1 characters
pub fn unpack_string(
    buf: &[u8],
    cursor: &mut usize,
    char_count: usize,
) -> Result<String, UnpackError> {
    Ok(take(buf, cursor, char_count)?
        .iter()
        .map(|&b| char::from(b))
        .collect())
}

pub fn unpack_i32(buf: &[u8], cursor: &mut usize) -> Result<i32, UnpackError> {
    Ok(LittleEndian::read_i32(take(buf, cursor, 4)?))
}

pub fn unpack_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, UnpackError> {
    Ok(LittleEndian::read_u32(take(buf, cursor, 4)?))
}

pub fn unpack_i64(buf: &[u8], cursor: &mut usize) -> Result<i64, UnpackError> {
    Ok(LittleEndian::read_i64(take(buf, cursor, 8)?))
}

pub fn unpack_f32(buf: &[u8], cursor: &mut usize) -> Result<f32, UnpackError> {
    Ok(LittleEndian::read_f32(take(buf, cursor, 4)?))
}

pub fn unpack_f64(buf: &[u8], cursor: &mut usize) -> Result<f64, UnpackError> {
    Ok(LittleEndian::read_f64(take(buf, cursor, 8)?))
}

pub fn unpack_vector2(buf: &[u8], cursor: &mut usize) -> Result<Vector2<f32>, UnpackError> {
    let mut xy = [0.0f32; 2];
    LittleEndian::read_f32_into(take(buf, cursor, 8)?, &mut xy);
    Ok(Vector2::new(xy[0], xy[1]))
}

pub fn unpack_vector3(buf: &[u8], cursor: &mut usize) -> Result<Vector3<f32>, UnpackError> {
    let mut xyz = [0.0f32; 3];
    LittleEndian::read_f32_into(take(buf, cursor, 12)?, &mut xyz);
    Ok(Vector3::new(xyz[0], xyz[1], xyz[2]))
}

/// Unpack a quaternion stored in x, y, z, w order
pub fn unpack_quaternion(buf: &[u8], cursor: &mut usize) -> Result<Quaternion<f32>, UnpackError> {
    let mut xyzw = [0.0f32; 4];
    LittleEndian::read_f32_into(take(buf, cursor, 16)?, &mut xyzw);
    Ok(Quaternion::new(xyzw[3], xyzw[0], xyzw[1], xyzw[2]))
}

/// Unpack three color bytes into RGB floats in [0, 1]
pub fn unpack_color(buf: &[u8], cursor: &mut usize) -> Result<[f32; 3], UnpackError> {
    let bytes = take(buf, cursor, 3)?;
    Ok([
        f32::from(bytes[0]) / 255.0,
        f32::from(bytes[1]) / 255.0,
        f32::from(bytes[2]) / 255.0,
    ])
}
