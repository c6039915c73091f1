use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;

/// Default ceiling on a single string/size field while decoding.
///
/// Guards against a hostile or corrupt peer claiming an absurd length and
/// causing an unbounded allocation.
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024 * 1024;

/// A self-describing bencode value.
///
/// Four shapes: byte-strings, signed integers, ordered lists, and mappings
/// keyed by byte-strings. Mappings are stored in a [`BTreeMap`] so that
/// iteration (and therefore encoding) is always in sorted key order,
/// matching the wire format's requirement that map keys be emitted sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Bytes(Bytes),
    Int(i64),
    List(Vec<Frame>),
    Map(BTreeMap<Bytes, Frame>),
}

impl Frame {
    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Frame::Bytes(b.into())
    }

    pub fn str(s: impl AsRef<str>) -> Self {
        Frame::Bytes(Bytes::copy_from_slice(s.as_ref().as_bytes()))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Frame]> {
        match self {
            Frame::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Bytes, Frame>> {
        match self {
            Frame::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Encode this value as bencode.
    ///
    /// # Test
    ///
    /// ```
    /// use m2m_codec::frame::Frame;
    ///
    /// let frame = Frame::List(vec![Frame::Int(1), Frame::bytes("hi")]);
    /// assert_eq!(frame.encode(), b"li1e2:hie".as_ref());
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Bytes(b) => {
                buf.put_slice(b.len().to_string().as_bytes());
                buf.put_u8(b':');
                buf.put_slice(b);
            }
            Frame::Int(n) => {
                buf.put_u8(b'i');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_u8(b'e');
            }
            Frame::List(items) => {
                buf.put_u8(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
            Frame::Map(map) => {
                buf.put_u8(b'd');
                // BTreeMap<Bytes, _> iterates in ascending (lexicographic) key
                // order already, so no explicit sort is needed here.
                for (k, v) in map {
                    Frame::Bytes(k.clone()).encode_into(buf);
                    v.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
        }
    }

    /// Decode one bencoded value from `data`, using [`DEFAULT_MAX_SIZE`] as
    /// the string-length ceiling.
    ///
    /// # Test
    ///
    /// ```
    /// use m2m_codec::frame::Frame;
    ///
    /// let frame = Frame::decode(b"li1e2:hie").unwrap();
    /// assert_eq!(frame, Frame::List(vec![Frame::Int(1), Frame::bytes("hi")]));
    /// ```
    pub fn decode(data: &[u8]) -> Result<Frame, Error> {
        Self::decode_with_limit(data, DEFAULT_MAX_SIZE)
    }

    pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<Frame, Error> {
        let mut cursor = Cursor { data, pos: 0, max_size };
        let frame = cursor.decode_value()?;
        Ok(frame)
    }
}

impl From<Vec<Frame>> for Frame {
    fn from(v: Vec<Frame>) -> Self {
        Frame::List(v)
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Frame::Int(n)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    max_size: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Result<u8, Error> {
        self.data.get(self.pos).copied().ok_or(Error::UnexpectedEof)
    }

    fn take(&mut self) -> Result<u8, Error> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(len).ok_or(Error::SizeOverflow)?;
        let slice = self.data.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn decode_value(&mut self) -> Result<Frame, Error> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.decode_integer()?;
                Ok(Frame::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.decode_value()?);
                }
                self.pos += 1;
                Ok(Frame::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut map = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key = match self.decode_value()? {
                        Frame::Bytes(b) => b,
                        _ => return Err(Error::NonByteStringKey),
                    };
                    let value = self.decode_value()?;
                    map.insert(key, value);
                }
                self.pos += 1;
                Ok(Frame::Map(map))
            }
            b'0'..=b'9' => {
                let len = self.decode_size()?;
                if len > self.max_size {
                    return Err(Error::SizeOverflow);
                }
                let bytes = self.take_slice(len)?;
                Ok(Frame::Bytes(Bytes::copy_from_slice(bytes)))
            }
            _ => Err(Error::IllegalDigitInSize),
        }
    }

    /// Reads `<digits>:`, rejecting a leading zero unless the size is exactly `0`.
    fn decode_size(&mut self) -> Result<usize, Error> {
        let first = self.take()?;
        if !first.is_ascii_digit() {
            return Err(Error::IllegalDigitInSize);
        }
        let mut value: usize = (first - b'0') as usize;
        let mut digits = 1;
        if first == b'0' {
            // Only a bare "0:" is legal; "01:x" is a leading-zero size.
            if self.peek()? != b':' {
                return Err(Error::LeadingZeroSize);
            }
            self.pos += 1;
            return Ok(0);
        }
        loop {
            let c = self.take()?;
            if c == b':' {
                break;
            }
            if !c.is_ascii_digit() {
                return Err(Error::IllegalDigitInSize);
            }
            digits += 1;
            if digits > 19 {
                return Err(Error::SizeOverflow);
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((c - b'0') as usize))
                .ok_or(Error::SizeOverflow)?;
        }
        Ok(value)
    }

    /// Reads the digits of an `i<digits>e` integer, having already consumed `i`.
    fn decode_integer(&mut self) -> Result<i64, Error> {
        let mut text = Vec::new();
        loop {
            let c = self.take()?;
            if c == b'e' {
                break;
            }
            if c != b'-' && !c.is_ascii_digit() {
                return Err(Error::IllegalDigitInInteger);
            }
            text.push(c);
        }
        if text.is_empty() {
            return Err(Error::IllegalDigitInInteger);
        }
        std::str::from_utf8(&text)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(Error::IllegalDigitInInteger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrips_bytes() {
        roundtrip(Frame::bytes("hello world"));
        roundtrip(Frame::bytes(""));
    }

    #[test]
    fn roundtrips_integers() {
        roundtrip(Frame::Int(0));
        roundtrip(Frame::Int(-42));
        roundtrip(Frame::Int(i64::MAX));
        roundtrip(Frame::Int(i64::MIN));
    }

    #[test]
    fn roundtrips_nested_list() {
        roundtrip(Frame::List(vec![
            Frame::Int(1),
            Frame::bytes("two"),
            Frame::List(vec![Frame::Int(3)]),
        ]));
    }

    #[test]
    fn roundtrips_map_sorted() {
        let mut map = BTreeMap::new();
        map.insert(Bytes::from_static(b"z"), Frame::Int(1));
        map.insert(Bytes::from_static(b"a"), Frame::Int(2));
        let frame = Frame::Map(map);
        let encoded = frame.encode();
        // "a" sorts before "z" regardless of insertion order.
        assert_eq!(encoded, Bytes::from_static(b"d1:ai2e1:zi1ee"));
        roundtrip(frame);
    }

    #[test]
    fn encoding_is_deterministic() {
        let frame = Frame::List(vec![Frame::bytes("x"), Frame::Int(7)]);
        assert_eq!(frame.encode(), frame.encode());
    }

    #[test]
    fn rejects_leading_zero_size() {
        let err = Frame::decode(b"01:x").unwrap_err();
        assert!(matches!(err, Error::LeadingZeroSize));
    }

    #[test]
    fn rejects_illegal_digit_in_size() {
        let err = Frame::decode(b"1x:x").unwrap_err();
        assert!(matches!(err, Error::IllegalDigitInSize));
    }

    #[test]
    fn rejects_size_over_limit() {
        let err = Frame::decode_with_limit(b"100:x", 4).unwrap_err();
        assert!(matches!(err, Error::SizeOverflow));
    }

    #[test]
    fn rejects_truncated_input() {
        let err = Frame::decode(b"5:ab").unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[test]
    fn rejects_non_bytestring_map_key() {
        let err = Frame::decode(b"di1ei2ee").unwrap_err();
        assert!(matches!(err, Error::NonByteStringKey));
    }

    #[test]
    fn zero_length_string_is_legal() {
        assert_eq!(Frame::decode(b"0:").unwrap(), Frame::bytes(""));
    }
}
