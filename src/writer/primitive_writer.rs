use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;

/// Write signed byte
pub fn write_i8(data: &mut Vec<u8>, value: i8) {
    data.extend_from_slice(&value.to_le_bytes());
}

/// Write unsigned byte
pub fn write_u8(data: &mut Vec<u8>, value: u8) {
    data.push(value);
}

/// Write bool
pub fn write_bool(data: &mut Vec<u8>, value: bool) {
    data.push(u8::from(value));
}

/// Write signed short
pub fn write_short(data: &mut Vec<u8>, value: i16) {
    data.extend_from_slice(&value.to_le_bytes());
}

/// Write signed 32
pub fn write_int(data: &mut Vec<u8>, value: i32) {
    data.extend_from_slice(&value.to_le_bytes());
}

/// Write double
pub fn write_f64(data: &mut Vec<u8>, value: f64) {
    data.extend_from_slice(&value.to_le_bytes());
}

/// Write `n` zero bytes.
pub fn write_blank(data: &mut Vec<u8>, n: usize) {
    data.resize(data.len() + n, 0);
}

/// Write a length as Int.
pub fn write_len(data: &mut Vec<u8>, len: usize) {
    write_int(data, i32::try_from(len).unwrap_or(i32::MAX));
}

/// RGB color followed by a blank byte
pub fn write_color(data: &mut Vec<u8>, color: i32) {
    let [_, r, g, b] = color.to_be_bytes();
    data.extend_from_slice(&[r, g, b, 0]);
}

/// Encode string the way Guitar Pro expects it
fn truncated_len(value: &str, bytes: &[u8], max: usize) -> usize {
    if bytes.len() > max {
        log::warn!("{value:?} is truncated to {max} bytes");
    }
    bytes.len().min(max)
}

fn make_bytes(value: &str) -> Cow<'_, [u8]> {
    let (bytes, encoding_used, had_errors) = WINDOWS_1252.encode(value);
    if had_errors {
        log::debug!("Unmappable characters in {value:?} for {encoding_used:?}");
    }
    bytes
}

/// String in a fixed size field.
/// [u8 string_len][size bytes field]
pub fn write_byte_size_string(data: &mut Vec<u8>, value: &str, size: usize) {
    let bytes = make_bytes(value);
    let len = truncated_len(value, &bytes, size.min(u8::MAX as usize));
    write_u8(data, len as u8);
    data.extend_from_slice(&bytes[..len]);
    write_blank(data, size - len);
}

/// Size of string encoded as Int.
/// [i32 string_len][string_len bytes]
pub fn write_int_sized_string(data: &mut Vec<u8>, value: &str) {
    let bytes = make_bytes(value);
    write_len(data, bytes.len());
    data.extend_from_slice(&bytes);
}

/// Size of string encoded as Int, followed by the size encoded as a byte.
/// [i32 string_len + 1][u8 string_len][string_len bytes]
pub fn write_int_byte_sized_string(data: &mut Vec<u8>, value: &str) {
    let bytes = make_bytes(value);
    let len = truncated_len(value, &bytes, u8::MAX as usize);
    write_len(data, len + 1);
    write_u8(data, len as u8);
    data.extend_from_slice(&bytes[..len]);
}
