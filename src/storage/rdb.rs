//! RDB snapshot parsing
//!
//! Reads the binary snapshot format consumed at cold start. Only string
//! values are supported; any malformed input surfaces as an `RdbError` and
//! the server falls back to an empty store.
//!
//! The writing side is a single fixed image: the server only ever emits an
//! empty snapshot, for the initial replication handoff.

use std::fmt;
use std::fs;
use std::path::Path;

use super::store::{Expiry, Store};

/// Auxiliary field: two strings follow
const OP_AUX: u8 = 0xFA;
/// Hash table size hint: two sizes follow
const OP_RESIZE_DB: u8 = 0xFB;
/// Key expiry in milliseconds: 8-byte little-endian timestamp follows
const OP_EXPIRE_MS: u8 = 0xFC;
/// Key expiry in seconds: 4-byte little-endian timestamp follows
const OP_EXPIRE_S: u8 = 0xFD;
/// Select database: a size follows
const OP_SELECT_DB: u8 = 0xFE;
/// String value type byte
const TYPE_STRING: u8 = 0x00;

/// Minimum valid empty snapshot: magic and version, a few auxiliary
/// fields, end-of-file marker and checksum.
const EMPTY_SNAPSHOT: &[u8] =
    b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfa\x0aredis-bits\xc0\x40\
\xfa\x05ctime\xc2\x6d\x08\xbc\x65\xfa\x08used-mem\xc2\xb0\xc4\x10\x00\
\xfa\x08aof-base\xc0\x00\xff\xf0\x6e\x3b\xfe\xc0\xff\x5a\xa2";

/// The fixed empty snapshot image sent to replicas on full resync
pub fn empty_snapshot() -> Vec<u8> {
    EMPTY_SNAPSHOT.to_vec()
}

/// Errors raised while parsing a snapshot
#[derive(Debug)]
pub enum RdbError {
    /// The input ended before a complete element was read
    UnexpectedEof,

    /// A size was requested but the byte carries a string encoding
    SizeIsStringEncoded,

    /// LZF-compressed strings are not supported
    LzfUnsupported,

    /// A string payload was not valid UTF-8
    InvalidUtf8,

    /// The database section is missing its hash table size information
    MissingResizeInfo,

    /// A value carried a type byte other than string
    UnsupportedValueType(u8),

    /// The file could not be read
    Io(String),
}

impl fmt::Display for RdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdbError::UnexpectedEof => write!(f, "unexpected end of snapshot"),
            RdbError::SizeIsStringEncoded => {
                write!(f, "expected size encoding, got string encoding")
            }
            RdbError::LzfUnsupported => write!(f, "LZF compression is not supported"),
            RdbError::InvalidUtf8 => write!(f, "invalid UTF-8 in snapshot string"),
            RdbError::MissingResizeInfo => {
                write!(f, "missing hash table size information")
            }
            RdbError::UnsupportedValueType(t) => {
                write!(f, "unsupported value type byte 0x{:02x}", t)
            }
            RdbError::Io(msg) => write!(f, "snapshot read failed: {}", msg),
        }
    }
}

impl std::error::Error for RdbError {}

/// Load a snapshot file into a fresh store
pub fn load_file(path: &Path) -> Result<Store, RdbError> {
    let data = fs::read(path).map_err(|e| RdbError::Io(e.to_string()))?;
    load_bytes(&data)
}

/// Parse a snapshot image into a fresh store
pub fn load_bytes(data: &[u8]) -> Result<Store, RdbError> {
    let mut reader = RdbReader::new(data);

    // Magic and version, 9 bytes, unchecked.
    reader.read(9)?;

    // Metadata section: any number of auxiliary string pairs.
    while reader.consume(OP_AUX) {
        reader.read_string()?;
        reader.read_string()?;
    }

    let store = Store::new();

    if reader.consume(OP_SELECT_DB) {
        reader.read_size()?; // database index

        if !reader.consume(OP_RESIZE_DB) {
            return Err(RdbError::MissingResizeInfo);
        }
        let total = reader.read_size()?;
        reader.read_size()?; // number of keys with expiry

        for _ in 0..total {
            let expiry = read_expiry(&mut reader)?;

            let type_byte = reader.read_u8()?;
            if type_byte != TYPE_STRING {
                return Err(RdbError::UnsupportedValueType(type_byte));
            }

            let key = reader.read_string()?;
            let value = reader.read_string()?;
            store.set_string(key, value, expiry);
        }
    }

    Ok(store)
}

fn read_expiry(reader: &mut RdbReader<'_>) -> Result<Expiry, RdbError> {
    if reader.consume(OP_EXPIRE_MS) {
        let bytes: [u8; 8] = reader.read(8)?.try_into().unwrap();
        Ok(Expiry::AtMs(u64::from_le_bytes(bytes)))
    } else if reader.consume(OP_EXPIRE_S) {
        let bytes: [u8; 4] = reader.read(4)?.try_into().unwrap();
        Ok(Expiry::AtMs(u64::from(u32::from_le_bytes(bytes)) * 1000))
    } else {
        Ok(Expiry::Never)
    }
}

/// Cursor over a snapshot image
struct RdbReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RdbReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        RdbReader { data, pos: 0 }
    }

    fn read(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.pos + n > self.data.len() {
            return Err(RdbError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, RdbError> {
        Ok(self.read(1)?[0])
    }

    /// Advance past `expected` if it is the next byte
    fn consume(&mut self, expected: u8) -> bool {
        if self.data.get(self.pos) == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Read a length. The top two bits of the first byte select the mode:
    /// 00 = low 6 bits, 01 = low 6 bits followed by one byte, 10 = the next
    /// 4 bytes, 11 = string encoding (an error here).
    fn read_size(&mut self) -> Result<usize, RdbError> {
        let first = self.read_u8()?;
        let remainder = (first & 0x3F) as usize;

        match first >> 6 {
            0b00 => Ok(remainder),
            0b01 => Ok(remainder * 256 + self.read_u8()? as usize),
            0b10 => {
                let bytes: [u8; 4] = self.read(4)?.try_into().unwrap();
                Ok(u32::from_be_bytes(bytes) as usize)
            }
            _ => Err(RdbError::SizeIsStringEncoded),
        }
    }

    /// Read a string: either a size-prefixed UTF-8 payload or one of the
    /// integer escapes (0xC0/0xC1/0xC2, rendered as decimal)
    fn read_string(&mut self) -> Result<String, RdbError> {
        if self.consume(0xC0) {
            return Ok(self.read_u8()?.to_string());
        }
        if self.consume(0xC1) {
            let bytes: [u8; 2] = self.read(2)?.try_into().unwrap();
            return Ok(u16::from_le_bytes(bytes).to_string());
        }
        if self.consume(0xC2) {
            let bytes: [u8; 4] = self.read(4)?.try_into().unwrap();
            return Ok(u32::from_le_bytes(bytes).to_string());
        }
        if self.consume(0xC3) {
            return Err(RdbError::LzfUnsupported);
        }

        let length = self.read_size()?;
        let payload = self.read(length)?;
        String::from_utf8(payload.to_vec()).map_err(|_| RdbError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a snapshot image around the given record bytes
    fn image_with_records(total: u8, records: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(b"REDIS0011");
        image.extend_from_slice(b"\xfa\x07version\x051.2.3");
        image.push(OP_SELECT_DB);
        image.push(0x00);
        image.push(OP_RESIZE_DB);
        image.push(total);
        image.push(0x00);
        image.extend_from_slice(records);
        image
    }

    #[test]
    fn test_load_empty_snapshot() {
        let store = load_bytes(EMPTY_SNAPSHOT).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_plain_records() {
        let mut records = Vec::new();
        records.extend_from_slice(b"\x00\x03foo\x03bar");
        records.extend_from_slice(b"\x00\x04name\x05value");

        let store = load_bytes(&image_with_records(2, &records)).unwrap();
        assert_eq!(store.get_string("foo").unwrap(), Some("bar".to_string()));
        assert_eq!(store.get_string("name").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn test_load_record_with_ms_expiry() {
        // Far enough in the future to be live.
        let at = (crate::storage::now_ms() + 60_000).to_le_bytes();

        let mut records = Vec::new();
        records.push(OP_EXPIRE_MS);
        records.extend_from_slice(&at);
        records.extend_from_slice(b"\x00\x01k\x01v");

        let store = load_bytes(&image_with_records(1, &records)).unwrap();
        assert_eq!(store.get_string("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_load_record_with_seconds_expiry_already_past() {
        let mut records = Vec::new();
        records.push(OP_EXPIRE_S);
        records.extend_from_slice(&1u32.to_le_bytes()); // one second past epoch
        records.extend_from_slice(b"\x00\x01k\x01v");

        let store = load_bytes(&image_with_records(1, &records)).unwrap();
        // Loaded, but expired on first read.
        assert_eq!(store.keys(), vec!["k".to_string()]);
        assert_eq!(store.get_string("k").unwrap(), None);
    }

    #[test]
    fn test_integer_encoded_values() {
        let mut records = Vec::new();
        records.extend_from_slice(b"\x00\x01a\xc0\x7b"); // 123
        records.extend_from_slice(b"\x00\x01b\xc1");
        records.extend_from_slice(&300u16.to_le_bytes());
        records.extend_from_slice(b"\x00\x01c\xc2");
        records.extend_from_slice(&70000u32.to_le_bytes());

        let store = load_bytes(&image_with_records(3, &records)).unwrap();
        assert_eq!(store.get_string("a").unwrap(), Some("123".to_string()));
        assert_eq!(store.get_string("b").unwrap(), Some("300".to_string()));
        assert_eq!(store.get_string("c").unwrap(), Some("70000".to_string()));
    }

    #[test]
    fn test_size_encoding_modes() {
        let mut reader = RdbReader::new(&[0x2A]);
        assert_eq!(reader.read_size().unwrap(), 42);

        // 01 mode: (1 << 8) + 44 = 300
        let mut reader = RdbReader::new(&[0x41, 0x2C]);
        assert_eq!(reader.read_size().unwrap(), 300);

        // 10 mode: 4-byte big-endian
        let mut reader = RdbReader::new(&[0x80, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(reader.read_size().unwrap(), 65536);

        // 11 mode is a string encoding, not a size
        let mut reader = RdbReader::new(&[0xC0, 0x05]);
        assert!(matches!(
            reader.read_size(),
            Err(RdbError::SizeIsStringEncoded)
        ));
    }

    #[test]
    fn test_lzf_is_rejected() {
        let records = b"\x00\x01k\xc3\x04\x04abcd";
        assert!(matches!(
            load_bytes(&image_with_records(1, records)),
            Err(RdbError::LzfUnsupported)
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(load_bytes(b"REDIS"), Err(RdbError::UnexpectedEof)));

        let records = b"\x00\x03foo"; // value missing
        assert!(matches!(
            load_bytes(&image_with_records(1, records)),
            Err(RdbError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_non_string_value_type() {
        let records = b"\x04\x01k\x01v";
        assert!(matches!(
            load_bytes(&image_with_records(1, records)),
            Err(RdbError::UnsupportedValueType(0x04))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_file(Path::new("/nonexistent/dump.rdb")),
            Err(RdbError::Io(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image_with_records(1, b"\x00\x03key\x03val"))
            .unwrap();
        file.flush().unwrap();

        let store = load_file(file.path()).unwrap();
        assert_eq!(store.get_string("key").unwrap(), Some("val".to_string()));
    }
}
