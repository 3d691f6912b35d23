use super::BencodeValue;
use crate::error::{Result, TorgetError};
use std::collections::BTreeMap;
use std::ops::Range;

/// Nesting limit for lists and dictionaries.
const MAX_DEPTH: usize = 64;

/// Decode a complete bencoded value. Trailing bytes after the top-level
/// value are an error.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    if pos != data.len() {
        return Err(TorgetError::BencodeError(format!(
            "Trailing data after value at offset {}",
            pos
        )));
    }
    Ok(value)
}

/// Locate the exact byte range of the value stored under `key` in a
/// top-level bencoded dictionary, without decoding it.
///
/// The returned span is the value as it appears in the source bytes, so
/// hashing it preserves non-canonical key order in the original file.
pub fn dict_value_span(data: &[u8], key: &[u8]) -> Result<Option<Range<usize>>> {
    if data.first() != Some(&b'd') {
        return Err(TorgetError::BencodeError(
            "Top-level value is not a dictionary".to_string(),
        ));
    }

    let mut pos = 1;
    loop {
        match data.get(pos) {
            None => {
                return Err(TorgetError::BencodeError(
                    "Unterminated dictionary".to_string(),
                ))
            }
            Some(b'e') => return Ok(None),
            Some(_) => {}
        }

        let entry_key = read_string(data, &mut pos)?;
        let start = pos;
        skip_value(data, &mut pos, 0)?;

        if entry_key == key {
            return Ok(Some(start..pos));
        }
    }
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    if depth > MAX_DEPTH {
        return Err(TorgetError::BencodeError(
            "Nesting depth limit exceeded".to_string(),
        ));
    }

    match data.get(*pos) {
        None => Err(TorgetError::BencodeError(
            "Unexpected end of input".to_string(),
        )),
        Some(b'i') => decode_integer(data, pos),
        Some(b'l') => decode_list(data, pos, depth),
        Some(b'd') => decode_dict(data, pos, depth),
        Some(b'0'..=b'9') => Ok(BencodeValue::Bytes(read_string(data, pos)?.to_vec())),
        Some(&c) => Err(TorgetError::BencodeError(format!(
            "Invalid bencode token: {}",
            c as char
        ))),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<BencodeValue> {
    *pos += 1; // 'i'

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(TorgetError::BencodeError(
            "Unterminated integer".to_string(),
        ));
    }

    let digits = &data[start..*pos];
    *pos += 1; // 'e'

    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(TorgetError::BencodeError("Invalid integer".to_string()));
    }
    // "i-0e" and leading zeros on non-zero values are malformed.
    if unsigned[0] == b'0' && (unsigned.len() > 1 || digits[0] == b'-') {
        return Err(TorgetError::BencodeError(
            "Integer with leading zero".to_string(),
        ));
    }

    let num = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| TorgetError::BencodeError("Integer out of range".to_string()))?;

    Ok(BencodeValue::Int(num))
}

/// Read a `<len>:<bytes>` string and return the content bytes.
fn read_string<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let start = *pos;
    while *pos < data.len() && data[*pos].is_ascii_digit() {
        *pos += 1;
    }

    if *pos == start || data.get(*pos) != Some(&b':') {
        return Err(TorgetError::BencodeError(
            "Invalid string length".to_string(),
        ));
    }

    let len = std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| TorgetError::BencodeError("Invalid string length".to_string()))?;

    *pos += 1; // ':'

    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| TorgetError::BencodeError("String length exceeds data".to_string()))?;

    let content = &data[*pos..end];
    *pos = end;
    Ok(content)
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    *pos += 1; // 'l'

    let mut list = Vec::new();
    while data.get(*pos).is_some_and(|&b| b != b'e') {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(TorgetError::BencodeError("Unterminated list".to_string()));
    }

    *pos += 1; // 'e'
    Ok(BencodeValue::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    *pos += 1; // 'd'

    // Unsorted keys are accepted here; the original byte order stays
    // available through dict_value_span for hashing.
    let mut dict = BTreeMap::new();
    while data.get(*pos).is_some_and(|&b| b != b'e') {
        let key = read_string(data, pos)?.to_vec();
        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(TorgetError::BencodeError(
            "Unterminated dictionary".to_string(),
        ));
    }

    *pos += 1; // 'e'
    Ok(BencodeValue::Dict(dict))
}

/// Advance past one value without building a tree.
fn skip_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(TorgetError::BencodeError(
            "Nesting depth limit exceeded".to_string(),
        ));
    }

    match data.get(*pos) {
        None => Err(TorgetError::BencodeError(
            "Unexpected end of input".to_string(),
        )),
        Some(b'i') => decode_integer(data, pos).map(|_| ()),
        Some(b'0'..=b'9') => read_string(data, pos).map(|_| ()),
        Some(b'l') => {
            *pos += 1;
            while data.get(*pos).is_some_and(|&b| b != b'e') {
                skip_value(data, pos, depth + 1)?;
            }
            if *pos >= data.len() {
                return Err(TorgetError::BencodeError("Unterminated list".to_string()));
            }
            *pos += 1;
            Ok(())
        }
        Some(b'd') => {
            *pos += 1;
            while data.get(*pos).is_some_and(|&b| b != b'e') {
                read_string(data, pos)?;
                skip_value(data, pos, depth + 1)?;
            }
            if *pos >= data.len() {
                return Err(TorgetError::BencodeError(
                    "Unterminated dictionary".to_string(),
                ));
            }
            *pos += 1;
            Ok(())
        }
        Some(&c) => Err(TorgetError::BencodeError(format!(
            "Invalid bencode token: {}",
            c as char
        ))),
    }
}
