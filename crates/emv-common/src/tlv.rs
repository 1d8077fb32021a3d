//! BER-TLV decoding and encoding
//!
//! Implements the subset of ISO/IEC 8825 BER used by ISO/IEC 7816-4 and EMV:
//! multi-byte tags, short/long/indefinite length forms, and the 0x00/0xFF
//! filler bytes cards are allowed to put between data objects.
//!
//! Constructed values are not decoded recursively. A caller that wants the
//! children of a template walks its value with a fresh [`TlvReader`].

use std::fmt;

use thiserror::Error;

/// Length byte announcing an indefinite-length value
const INDEFINITE_LENGTH: u8 = 0x80;

/// End-of-contents marker terminating an indefinite-length value
const END_OF_CONTENTS: [u8; 2] = [0x00, 0x00];

/// Widest long-form length field accepted (in octets)
const MAX_LENGTH_OCTETS: usize = 4;

/// Malformed TLV conditions
///
/// Every variant means the byte stream does not hold a valid data object at
/// the current position. Callers treat them all as corrupt card data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("malformed TLV: {remaining} byte(s) left where a TLV was expected")]
    Truncated { remaining: usize },

    #[error("malformed TLV: tag runs past the end of the data")]
    UnexpectedEndTag,

    #[error("malformed TLV: length runs past the end of the data")]
    UnexpectedEndLength,

    #[error("malformed TLV: tag {tag} declares {expected} value bytes, {available} available")]
    UnexpectedEndValue {
        tag: String,
        expected: usize,
        available: usize,
    },

    #[error("malformed TLV: {0}-octet length fields are not supported")]
    LengthTooLarge(usize),

    #[error("malformed TLV: indefinite-length value of tag {0} has no end-of-contents marker")]
    MissingEndOfContents(String),
}

/// A single decoded data object
///
/// The raw length bytes are kept as they appeared on the wire so that
/// re-encoding reproduces the original bytes, including non-minimal long
/// forms and the indefinite form.
#[derive(Clone, PartialEq, Eq)]
pub struct BerTlv {
    tag: Vec<u8>,
    length: Vec<u8>,
    value: Vec<u8>,
}

impl BerTlv {
    /// Build a data object with a minimal definite length encoding
    pub fn new(tag: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        Self {
            tag: tag.into(),
            length: encode_length(value.len()),
            value,
        }
    }

    /// Tag identifier bytes
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    /// Length field exactly as encoded
    pub fn raw_length(&self) -> &[u8] {
        &self.length
    }

    /// Value bytes
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consume the object and return its value bytes
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Whether bit 6 of the first tag byte marks a constructed object
    pub fn is_constructed(&self) -> bool {
        self.tag.first().is_some_and(|b| b & 0x20 != 0)
    }

    /// Whether the value used the indefinite length form
    pub fn is_indefinite(&self) -> bool {
        self.length == [INDEFINITE_LENGTH]
    }

    /// Reader over the value bytes of a constructed object
    pub fn children(&self) -> TlvReader<'_> {
        TlvReader::new(&self.value)
    }

    /// Encode back to wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tag.len() + self.length.len() + self.value.len() + 2);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.length);
        out.extend_from_slice(&self.value);
        if self.is_indefinite() {
            out.extend_from_slice(&END_OF_CONTENTS);
        }
        out
    }
}

impl fmt::Debug for BerTlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BerTlv")
            .field("tag", &format_args!("{}", hex::encode_upper(&self.tag)))
            .field("length", &format_args!("{}", hex::encode_upper(&self.length)))
            .field("value", &format_args!("{}", hex::encode_upper(&self.value)))
            .finish()
    }
}

/// Encode a definite length in the shortest BER form
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }

    let bytes = (len as u64).to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(1 + bytes.len() - first);
    out.push(0x80 | (bytes.len() - first) as u8);
    out.extend_from_slice(&bytes[first..]);
    out
}

/// Streaming reader over a sequence of data objects
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Decode the next data object
    ///
    /// Returns `Ok(None)` once only filler (or nothing) is left.
    pub fn next_tlv(&mut self) -> Result<Option<BerTlv>, TlvError> {
        self.skip_filler();

        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < 2 {
            return Err(TlvError::Truncated { remaining });
        }

        let tag = self.read_tag()?;
        let (length, declared) = self.read_length()?;
        let value = match declared {
            Some(len) => self.read_definite_value(&tag, len)?,
            None => self.read_indefinite_value(&tag)?,
        };

        self.skip_filler();

        Ok(Some(BerTlv { tag, length, value }))
    }

    fn skip_filler(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b != 0x00 && b != 0xFF {
                break;
            }
            self.pos += 1;
        }
    }

    fn read_tag(&mut self) -> Result<Vec<u8>, TlvError> {
        let start = self.pos;
        let first = *self.data.get(self.pos).ok_or(TlvError::UnexpectedEndTag)?;
        self.pos += 1;

        // Low five bits all set: subsequent bytes follow while bit 8 is set
        if first & 0x1F == 0x1F {
            loop {
                let b = *self.data.get(self.pos).ok_or(TlvError::UnexpectedEndTag)?;
                self.pos += 1;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }

        Ok(self.data[start..self.pos].to_vec())
    }

    /// Returns the raw length bytes and the decoded length (`None` = indefinite)
    fn read_length(&mut self) -> Result<(Vec<u8>, Option<usize>), TlvError> {
        let start = self.pos;
        let first = *self.data.get(self.pos).ok_or(TlvError::UnexpectedEndLength)?;
        self.pos += 1;

        let declared = match first {
            0x00..=0x7F => Some(first as usize),
            INDEFINITE_LENGTH => None,
            _ => {
                let count = (first & 0x7F) as usize;
                if count > MAX_LENGTH_OCTETS {
                    return Err(TlvError::LengthTooLarge(count));
                }
                let octets = self
                    .data
                    .get(self.pos..self.pos + count)
                    .ok_or(TlvError::UnexpectedEndLength)?;
                self.pos += count;
                Some(octets.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
            }
        };

        Ok((self.data[start..self.pos].to_vec(), declared))
    }

    fn read_definite_value(&mut self, tag: &[u8], len: usize) -> Result<Vec<u8>, TlvError> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(TlvError::UnexpectedEndValue {
                tag: hex::encode_upper(tag),
                expected: len,
                available,
            });
        }
        let value = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(value)
    }

    fn read_indefinite_value(&mut self, tag: &[u8]) -> Result<Vec<u8>, TlvError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .windows(END_OF_CONTENTS.len())
            .position(|w| w == END_OF_CONTENTS)
            .ok_or_else(|| TlvError::MissingEndOfContents(hex::encode_upper(tag)))?;
        let value = rest[..end].to_vec();
        self.pos += end + END_OF_CONTENTS.len();
        Ok(value)
    }
}

impl Iterator for TlvReader<'_> {
    type Item = Result<BerTlv, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_tlv() {
            Ok(Some(tlv)) => Some(Ok(tlv)),
            Ok(None) => None,
            Err(err) => {
                // Nothing sensible can follow a malformed object
                self.pos = self.data.len();
                Some(Err(err))
            }
        }
    }
}

/// Decode every top-level data object in `data`
pub fn parse_all(data: &[u8]) -> Result<Vec<BerTlv>, TlvError> {
    TlvReader::new(data).collect()
}

/// Search for a tag, descending into constructed objects depth-first
///
/// Returns the value of the first match. Decoding stops silently at the first
/// malformed object, so a corrupt tail only hides the tags inside it.
pub fn find_tag(data: &[u8], tag: &[u8]) -> Option<Vec<u8>> {
    for tlv in TlvReader::new(data) {
        let tlv = tlv.ok()?;
        if tlv.tag() == tag {
            return Some(tlv.into_value());
        }
        if tlv.is_constructed() {
            if let Some(found) = find_tag(tlv.value(), tag) {
                return Some(found);
            }
        }
    }
    None
}
