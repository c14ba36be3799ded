//! Percent-encoding helpers shared by the wire codec, group keys and
//! failover file names.

use super::types::ProtocolError;

/// application/x-www-form-urlencoded 编码，空格编码为 '+'
pub fn form_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 2);
    for byte in input.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => out.push(byte as char),
            b' ' => out.push('+'),
            other => {
                out.push('%');
                out.push(hex_digit(other >> 4));
                out.push(hex_digit(other & 0x0F));
            }
        }
    }
    out
}

/// form_encode 的逆操作
pub fn form_decode(input: &str) -> Result<String, ProtocolError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(from_hex);
                let lo = bytes.get(i + 2).copied().and_then(from_hex);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => return Err(ProtocolError::InvalidEncoding(input.to_string())),
                }
                i += 3;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| ProtocolError::InvalidEncoding(input.to_string()))
}

// groupKey 中只转义 '+' 和 '%'
pub(crate) fn encode_group_key_part(part: &str, sb: &mut String) {
    for c in part.chars() {
        match c {
            '+' => sb.push_str("%2B"),
            '%' => sb.push_str("%25"),
            other => sb.push(other),
        }
    }
}

pub(crate) fn decode_group_key_part(escaped: &str) -> Option<char> {
    match escaped {
        "2B" => Some('+'),
        "25" => Some('%'),
        _ => None,
    }
}

fn hex_digit(nibble: u8) -> char {
    char::from(b"0123456789ABCDEF"[nibble as usize])
}

fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
