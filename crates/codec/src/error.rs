use std::fmt;

/// Errors produced while decoding a bencoded frame, or while mapping a
/// decoded frame onto a known packet shape.
#[derive(Debug)]
pub enum Error {
    /// A string length began with `0` followed by further digits (`01:x`).
    LeadingZeroSize,
    /// A byte that is not `0`-`9` or `:` appeared while reading a string length.
    IllegalDigitInSize,
    /// The string length exceeded the configured maximum (or overflowed `usize`).
    SizeOverflow,
    /// A byte that is not `0`-`9`, `-`, or `e` appeared while reading an integer.
    IllegalDigitInInteger,
    /// The input ended before a value was fully read.
    UnexpectedEof,
    /// A mapping key was not a byte-string.
    NonByteStringKey,
    /// The outer frame was not a list.
    NotAList,
    /// The packet's tag was not present in the registry.
    UnknownTag(i64),
    /// A required field was absent from the packet body.
    MissingField(&'static str),
    /// A field was present but not of the expected shape.
    WrongFieldType(&'static str),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LeadingZeroSize => write!(f, "leading zero in string size"),
            Error::IllegalDigitInSize => write!(f, "illegal digit in string size"),
            Error::SizeOverflow => write!(f, "string size exceeds maximum"),
            Error::IllegalDigitInInteger => write!(f, "illegal digit in integer"),
            Error::UnexpectedEof => write!(f, "unexpected end of input"),
            Error::NonByteStringKey => write!(f, "mapping key is not a byte-string"),
            Error::NotAList => write!(f, "packet frame is not a list"),
            Error::UnknownTag(tag) => write!(f, "unknown packet tag {}", tag),
            Error::MissingField(name) => write!(f, "missing field '{}'", name),
            Error::WrongFieldType(name) => write!(f, "field '{}' has the wrong type", name),
        }
    }
}
