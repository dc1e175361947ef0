//! Domain names: parsing, label-pointer decompression, and compressed
//! serialization.
//!
//! Decompression follows `rustdns::io::DNSReadExt::read_qname`: labels
//! are read one at a time, a length byte with the top two bits set is a
//! pointer, compression pointers must point strictly backwards (to
//! bytes already consumed), and the loop is additionally bounded by a
//! hop counter per spec.md section 4.1 (the teacher only bounds it via
//! the backwards-pointer check; this expansion adds the explicit
//! counter spec.md asks for, since a pointer can point backwards into
//! another pointer indefinitely without ever revisiting the same byte
//! twice in a small enough message).
//!
//! Compression on write has no teacher counterpart (`rustdns::dns`'s
//! `Message::write_qname` writes labels uncompressed and says so in a
//! TODO) — the suffix-to-offset dictionary here is new code, grounded
//! on the wire format the read side already understands.

use byteorder::ReadBytesExt;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Seek, SeekFrom};

use crate::errors::ParseError;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 256;
const POINTER_MASK: u8 = 0xc0;
const POINTER_OFFSET_MASK: u16 = 0x3fff;

/// A domain name, stored with both its original-case display form and
/// a canonical lowercase comparison key (spec.md section 9, Design
/// Notes: "never reparse to compare").
#[derive(Clone, Debug, Eq)]
pub struct Name {
    display: String,
    key: Vec<u8>,
}

impl Name {
    pub fn root() -> Name {
        Name {
            display: ".".to_string(),
            key: Vec::new(),
        }
    }

    /// Parses a display-form domain name such as `"myhost.local"` or
    /// `"myhost.local."`.
    pub fn parse(s: &str) -> Result<Name, ParseError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Name::root());
        }

        let mut key = Vec::new();
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(ParseError::Malformed("empty label in domain name"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(ParseError::LabelTooLong);
            }
            key.extend_from_slice(label.to_ascii_lowercase().as_bytes());
            key.push(b'.');
        }
        if key.len() > MAX_NAME_LEN {
            return Err(ParseError::NameTooLong);
        }

        Ok(Name {
            display: format!("{}.", trimmed),
            key,
        })
    }

    /// Reads a (possibly compressed) name starting at the cursor's
    /// current position.
    pub fn read(cur: &mut Cursor<&[u8]>) -> Result<Name, ParseError> {
        let mut display = String::new();
        let mut hops = 0usize;
        let mut cur_pos = cur.position();
        let mut jumped = false;
        let mut name_len = 0usize;

        loop {
            // Position of the length/pointer byte we're about to read,
            // used to reject pointers that don't point strictly backwards.
            let label_start = cur.position();
            let len = peek_u8(cur)?;

            if len == 0 {
                cur.consume_u8()?;
                break;
            }

            match len & POINTER_MASK {
                0x00 => {
                    cur.consume_u8()?;
                    let mut label = vec![0u8; len as usize];
                    read_exact(cur, &mut label)?;

                    let label = std::str::from_utf8(&label)
                        .map_err(|_| ParseError::Malformed("label is not valid utf8"))?;

                    if !display.is_empty() {
                        display.push('.');
                    }
                    display.push_str(label);

                    name_len += label.len() + 1;
                    if name_len > MAX_NAME_LEN {
                        return Err(ParseError::NameTooLong);
                    }
                }

                POINTER_MASK => {
                    hops += 1;
                    if hops > MAX_POINTER_HOPS {
                        return Err(ParseError::PointerLoop);
                    }

                    let b1 = cur.read_u8().map_err(|_| ParseError::Truncated("name"))?;
                    let b2 = cur.read_u8().map_err(|_| ParseError::Truncated("name"))?;
                    let ptr = (((b1 as u16) & !POINTER_MASK as u16) << 8) | b2 as u16;
                    let ptr = ptr & POINTER_OFFSET_MASK;

                    if !jumped {
                        cur_pos = cur.position();
                        jumped = true;
                    }

                    if ptr as u64 >= label_start {
                        return Err(ParseError::BadPointer);
                    }

                    cur.seek(SeekFrom::Start(ptr as u64))
                        .map_err(|_| ParseError::BadPointer)?;
                }

                _ => return Err(ParseError::Malformed("unsupported label length prefix")),
            }
        }

        if jumped {
            cur.seek(SeekFrom::Start(cur_pos))
                .map_err(|_| ParseError::Truncated("name"))?;
        }

        if display.is_empty() {
            return Ok(Name::root());
        }

        let key: Vec<u8> = display
            .split('.')
            .flat_map(|l| l.to_ascii_lowercase().into_bytes().into_iter().chain(Some(b'.')))
            .collect();

        Ok(Name {
            display: format!("{}.", display),
            key,
        })
    }

    /// Writes this name, compressing against `dict` (a map from the
    /// canonical lowercase suffix to the offset it was first written
    /// at). Returns nothing; `dict` is updated with every new suffix
    /// written so later names can point back at this one.
    pub fn write(&self, buf: &mut Vec<u8>, dict: &mut HashMap<Vec<u8>, u16>) {
        write_labels(&self.key, buf, dict)
    }

    pub fn as_display(&self) -> &str {
        &self.display
    }

    pub fn as_key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }
}

fn write_labels(key: &[u8], buf: &mut Vec<u8>, dict: &mut HashMap<Vec<u8>, u16>) {
    if key.is_empty() {
        buf.push(0);
        return;
    }

    if let Some(&offset) = dict.get(key) {
        buf.push(POINTER_MASK | ((offset >> 8) as u8));
        buf.push((offset & 0xff) as u8);
        return;
    }

    // Only record this suffix if the pointer format (14 bits) can
    // address it later.
    if buf.len() <= POINTER_OFFSET_MASK as usize {
        dict.insert(key.to_vec(), buf.len() as u16);
    }

    let dot = key.iter().position(|&b| b == b'.').expect("label key ends in '.'");
    let (label, rest) = key.split_at(dot);
    let rest = &rest[1..]; // skip the '.'

    buf.push(label.len() as u8);
    buf.extend_from_slice(label);

    write_labels(rest, buf, dict)
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

fn peek_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
    let pos = cur.position() as usize;
    cur.get_ref()
        .get(pos)
        .copied()
        .ok_or(ParseError::Truncated("name"))
}

trait CursorExt {
    fn consume_u8(&mut self) -> Result<u8, ParseError>;
}

impl CursorExt for Cursor<&[u8]> {
    fn consume_u8(&mut self) -> Result<u8, ParseError> {
        ReadBytesExt::read_u8(self).map_err(|_| ParseError::Truncated("name"))
    }
}

fn read_exact(cur: &mut Cursor<&[u8]>, out: &mut [u8]) -> Result<(), ParseError> {
    io::Read::read_exact(cur, out).map_err(|_| ParseError::Truncated("label"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(Name::parse("myhost.local").unwrap().to_string(), "myhost.local.");
        assert_eq!(Name::parse("myhost.local.").unwrap().to_string(), "myhost.local.");
        assert_eq!(Name::parse("").unwrap().to_string(), ".");
    }

    #[test]
    fn test_case_insensitive_eq() {
        let a = Name::parse("MyHost.Local").unwrap();
        let b = Name::parse("myhost.local").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "MyHost.Local.");
    }

    #[test]
    fn test_label_too_long() {
        let label = "a".repeat(64);
        assert_eq!(Name::parse(&label).unwrap_err(), ParseError::LabelTooLong);
    }

    #[test]
    fn test_round_trip_no_compression() {
        let name = Name::parse("a.b.example.local").unwrap();
        let mut buf = Vec::new();
        let mut dict = HashMap::new();
        name.write(&mut buf, &mut dict);

        let mut cur = Cursor::new(buf.as_slice());
        let decoded = Name::read(&mut cur).unwrap();
        assert_eq!(decoded, name);
        assert_eq!(cur.position() as usize, buf.len());
    }

    #[test]
    fn test_compression_pointer() {
        let mut buf = Vec::new();
        let mut dict = HashMap::new();

        let first = Name::parse("server.example.local").unwrap();
        first.write(&mut buf, &mut dict);
        let first_len = buf.len();

        let second = Name::parse("other.example.local").unwrap();
        second.write(&mut buf, &mut dict);

        // The second name should have compressed against "example.local."
        // written by the first, so it's much shorter than writing it out
        // in full again.
        assert!(buf.len() - first_len < second.as_key().len());

        let mut cur = Cursor::new(buf.as_slice());
        let decoded_first = Name::read(&mut cur).unwrap();
        assert_eq!(decoded_first, first);

        let decoded_second = Name::read(&mut cur).unwrap();
        assert_eq!(decoded_second, second);
    }

    #[test]
    fn test_forward_pointer_rejected() {
        // A pointer at offset 0 pointing at offset 2 (itself + 2, forward).
        let buf = vec![0xc0, 0x02, 0x00];
        let mut cur = Cursor::new(buf.as_slice());
        assert_eq!(Name::read(&mut cur).unwrap_err(), ParseError::BadPointer);
    }
}
