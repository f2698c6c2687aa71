//! MessagePack encoder.
//!
//! Always picks the smallest representation, as device firmware does. Used by
//! the simulated device and by tests to produce realistic byte streams.

use super::value::Value;

/// Encode `value` into a fresh buffer.
pub fn to_vec(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode(value, &mut out);
    out
}

/// Append the encoding of `value` to `out`.
pub fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Nil => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::Int(n) => encode_int(*n, out),
        Value::UInt(n) => encode_uint(*n, out),
        Value::Float(x) => {
            out.push(0xcb);
            out.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            let len = s.len();
            match len {
                0..=31 => out.push(0xa0 | len as u8),
                32..=0xff => out.extend_from_slice(&[0xd9, len as u8]),
                0x100..=0xffff => {
                    out.push(0xda);
                    out.extend_from_slice(&(len as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xdb);
                    out.extend_from_slice(&(len as u32).to_be_bytes());
                }
            }
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bin(bytes) => {
            let len = bytes.len();
            match len {
                0..=0xff => out.extend_from_slice(&[0xc4, len as u8]),
                0x100..=0xffff => {
                    out.push(0xc5);
                    out.extend_from_slice(&(len as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xc6);
                    out.extend_from_slice(&(len as u32).to_be_bytes());
                }
            }
            out.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            container_header(items.len(), 0x90, 0xdc, 0xdd, out);
            for item in items {
                encode(item, out);
            }
        }
        Value::Map(entries) => {
            container_header(entries.len(), 0x80, 0xde, 0xdf, out);
            for (key, value) in entries {
                encode(key, out);
                encode(value, out);
            }
        }
        Value::Ext(kind, bytes) => {
            let len = bytes.len();
            match len {
                1 => out.push(0xd4),
                2 => out.push(0xd5),
                4 => out.push(0xd6),
                8 => out.push(0xd7),
                16 => out.push(0xd8),
                0..=0xff => out.extend_from_slice(&[0xc7, len as u8]),
                0x100..=0xffff => {
                    out.push(0xc8);
                    out.extend_from_slice(&(len as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xc9);
                    out.extend_from_slice(&(len as u32).to_be_bytes());
                }
            }
            out.extend_from_slice(&kind.to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
}

fn container_header(len: usize, fix: u8, tag16: u8, tag32: u8, out: &mut Vec<u8>) {
    match len {
        0..=15 => out.push(fix | len as u8),
        16..=0xffff => {
            out.push(tag16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(tag32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

fn encode_uint(n: u64, out: &mut Vec<u8>) {
    if n <= 0x7f {
        out.push(n as u8);
    } else if n <= 0xff {
        out.extend_from_slice(&[0xcc, n as u8]);
    } else if n <= 0xffff {
        out.push(0xcd);
        out.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xce);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        out.push(0xcf);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_int(n: i64, out: &mut Vec<u8>) {
    if n >= 0 {
        encode_uint(n as u64, out);
    } else if n >= -32 {
        out.push(n as i8 as u8);
    } else if n >= i64::from(i8::MIN) {
        out.extend_from_slice(&[0xd0, n as i8 as u8]);
    } else if n >= i64::from(i16::MIN) {
        out.push(0xd1);
        out.extend_from_slice(&(n as i16).to_be_bytes());
    } else if n >= i64::from(i32::MIN) {
        out.push(0xd2);
        out.extend_from_slice(&(n as i32).to_be_bytes());
    } else {
        out.push(0xd3);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_map_uses_fix_forms() {
        let value = Value::Map(vec![(Value::from("t"), Value::Int(7))]);
        assert_eq!(to_vec(&value), vec![0x81, 0xa1, b't', 0x07]);
    }

    #[test]
    fn integer_widths() {
        assert_eq!(to_vec(&Value::Int(-5)), vec![0xfb]);
        assert_eq!(to_vec(&Value::Int(-100)), vec![0xd0, 0x9c]);
        assert_eq!(to_vec(&Value::Int(300)), vec![0xcd, 0x01, 0x2c]);
        assert_eq!(to_vec(&Value::Int(70_000)), vec![0xce, 0x00, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn fixext_forms() {
        assert_eq!(to_vec(&Value::Ext(3, vec![9])), vec![0xd4, 0x03, 0x09]);
        assert_eq!(to_vec(&Value::Ext(-1, vec![1, 2, 3])), vec![0xc7, 0x03, 0xff, 1, 2, 3]);
    }
}
