use encoding_rs::WINDOWS_1252;
use nom::combinator::{flat_map, map};
use nom::error::{Error, ErrorKind};
use nom::{bytes, number, IResult, Parser};

/// Parse signed byte
pub fn parse_i8(i: &[u8]) -> IResult<&[u8], i8> {
    number::complete::le_i8(i)
}

/// Parse unsigned byte
pub fn parse_u8(i: &[u8]) -> IResult<&[u8], u8> {
    number::complete::le_u8(i)
}

/// Parse signed 32
pub fn parse_int(i: &[u8]) -> IResult<&[u8], i32> {
    number::complete::le_i32(i)
}

/// Parse bool
pub fn parse_bool(i: &[u8]) -> IResult<&[u8], bool> {
    map(number::complete::le_u8, |b| b == 1).parse(i)
}

/// Parse signed short
pub fn parse_short(i: &[u8]) -> IResult<&[u8], i16> {
    number::complete::le_i16(i)
}

/// Parse double
pub fn parse_f64(i: &[u8]) -> IResult<&[u8], f64> {
    number::complete::le_f64(i)
}

/// Skip `n` bytes, failing if the input is too short.
pub fn skip(n: usize) -> impl FnMut(&[u8]) -> IResult<&[u8], ()> {
    move |i: &[u8]| {
        log::debug!("skip: {n}");
        map(bytes::complete::take(n), |_| ()).parse(i)
    }
}

/// Materialize properly encoded String
fn make_string(i: &[u8]) -> String {
    let (cow, encoding_used, had_errors) = WINDOWS_1252.decode(i);
    if had_errors {
        log::debug!("Error parsing string with {encoding_used:?}");
        match std::str::from_utf8(i) {
            Ok(s) => s.to_string(),
            Err(e) => {
                log::debug!("Error UTF-8 string parsing:{e}");
                String::new()
            }
        }
    } else {
        cow.to_string()
    }
}

/// Parse string field of length `string_len` with total size to consume `field_size`
fn parse_string_field(
    field_size: usize,
    string_len: usize,
) -> impl FnMut(&[u8]) -> IResult<&[u8], String> {
    move |i: &[u8]| {
        log::debug!("Parsing string field: field_size={field_size}, string_len={string_len}");

        // Read exactly the field size
        let (rest, field) = bytes::complete::take(field_size)(i)?;

        // Decode only the meaningful string bytes
        let string = make_string(&field[..std::cmp::min(string_len, field_size)]);

        Ok((rest, string))
    }
}

/// Converts a length read from the file into a field size.
fn field_size(i: &[u8], len: i32) -> Result<usize, nom::Err<Error<&[u8]>>> {
    usize::try_from(len).map_err(|_| {
        log::debug!("Invalid string length {len}");
        nom::Err::Error(Error::new(i, ErrorKind::LengthValue))
    })
}

/// Size of string encoded as Int.
/// [i32 string_len][size bytes field]
pub fn parse_int_sized_string(i: &[u8]) -> IResult<&[u8], String> {
    let (i, len) = parse_int(i)?;
    let size = field_size(i, len)?;
    parse_string_field(size, size)(i)
}

/// Size of Strings provided
/// `size`:   real string length
/// `length`: optional provided length (in case of blank chars after the string)
pub fn parse_byte_size_string(size: usize) -> impl FnMut(&[u8]) -> IResult<&[u8], String> {
    move |i: &[u8]| {
        let (i, length) = parse_u8(i)?;
        log::debug!("Parsing byte sized string of length {length} for String size {size}");
        parse_string_field(size, length as usize)(i)
    }
}

/// Size of string encoded as Int, but the size is encoded as a byte.
/// [i32 field_len + 1][u8 string_len][field_len bytes field]
pub fn parse_int_byte_sized_string(i: &[u8]) -> IResult<&[u8], String> {
    let (inner, len) = parse_int(i)?;
    let size = field_size(i, len.saturating_sub(1))?;
    flat_map(parse_u8, move |str_len| {
        log::debug!("Parsing int byte sized string int_len={len} u8_len={str_len}");
        parse_string_field(size, str_len as usize)
    })
    .parse(inner)
}

#[cfg(test)]
mod tests {
    use crate::parser::primitive_parser::{
        parse_byte_size_string, parse_int_byte_sized_string, parse_int_sized_string, skip,
    };

    #[test]
    fn test_read_byte_size_string() {
        let data: Vec<u8> = vec![
            0x18, 0x46, 0x49, 0x43, 0x48, 0x49, 0x45, 0x52, 0x20, 0x47, 0x55, 0x49, 0x54, 0x41,
            0x52, 0x20, 0x50, 0x52, 0x4f, 0x20, 0x76, 0x35, 0x2e, 0x30, 0x30, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let (rest, res) = parse_byte_size_string(30)(&data).unwrap();
        assert_eq!(res, "FICHIER GUITAR PRO v5.00");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_read_int_byte_sized_string() {
        let data: Vec<u8> = vec![0x05, 0x00, 0x00, 0x00, 0x04, b'I', b'n', b't', b'r', 0xFF];
        let (rest, res) = parse_int_byte_sized_string(&data).unwrap();
        assert_eq!(res, "Intr");
        assert_eq!(rest, &[0xFF]);
    }

    #[test]
    fn test_read_int_sized_string_windows_1252() {
        // 0xE9 is 'é' in Windows-1252
        let data: Vec<u8> = vec![0x03, 0x00, 0x00, 0x00, b'f', b'e', 0xE9];
        let (_rest, res) = parse_int_sized_string(&data).unwrap();
        assert_eq!(res, "feé");
    }

    #[test]
    fn test_reject_negative_length() {
        let data: Vec<u8> = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert!(parse_int_sized_string(&data).is_err());
    }

    #[test]
    fn test_skip_past_end_fails() {
        let data: Vec<u8> = vec![0x01, 0x02];
        assert!(skip(3)(&data).is_err());
        let (rest, ()) = skip(1)(&data).unwrap();
        assert_eq!(rest, &[0x02]);
    }
}
