//! In-memory keyspace with optional expiration
//!
//! Maps keys to typed values (string or stream). Expiration is an absolute
//! wall-clock timestamp in milliseconds; an expired entry is removed the
//! next time it is read.

use std::collections::HashMap;
use std::sync::Mutex;

use super::now_ms;
use super::rdb;
use super::stream::{
    AppendError, InvalidStreamId, SeqDefault, Stream, StreamEntry, StreamId,
};

/// A stored value: a byte string or a stream
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Stream(Stream),
}

/// Value type discriminant, as reported by TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Stream,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Stream => "stream",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Stream(_) => ValueKind::Stream,
        }
    }
}

/// Expiration policy for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Never expires
    Never,

    /// Expires this many milliseconds from now
    RelativeMs(u64),

    /// Expires at this absolute UNIX timestamp in milliseconds
    AtMs(u64),
}

impl Expiry {
    fn resolve(self) -> Option<u64> {
        match self {
            Expiry::Never => None,
            Expiry::RelativeMs(ms) => Some(now_ms().saturating_add(ms)),
            Expiry::AtMs(ts) => Some(ts),
        }
    }
}

/// A read hit a key holding the wrong value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

/// Why a stream write was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamWriteError {
    /// The key holds a non-stream value
    WrongType,

    /// The entry-ID string did not parse
    InvalidId(InvalidStreamId),

    /// The stream rejected the append
    Append(AppendError),
}

/// Why a stream range read was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamReadError {
    /// The key holds a non-stream value
    WrongType,

    /// A bound did not parse as an entry ID
    InvalidId(InvalidStreamId),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Absolute expiration in epoch milliseconds; None means never
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// The server's keyspace. All methods lock internally.
#[derive(Debug, Default)]
pub struct Store {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Get the string stored at `key`.
    ///
    /// An expired entry is removed and reported absent. A live stream value
    /// reports `WrongType`.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, WrongType> {
        let mut entries = self.entries.lock().unwrap();
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::String(s) => Ok(Some(s.clone())),
                Value::Stream(_) => Err(WrongType),
            },
        }
    }

    /// Store a string at `key`, replacing any prior value regardless of type
    pub fn set_string(&self, key: impl Into<String>, value: impl Into<String>, expiry: Expiry) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.into(),
            Entry {
                value: Value::String(value.into()),
                expires_at: expiry.resolve(),
            },
        );
    }

    /// Increment the integer stored at `key`.
    ///
    /// An absent key is set to "1". Returns None when the value is not a
    /// string representing a signed 64-bit integer, or the increment would
    /// overflow. This path deliberately does not consult expiration.
    pub fn increment(&self, key: &str) -> Option<i64> {
        let mut entries = self.entries.lock().unwrap();

        let Some(entry) = entries.get_mut(key) else {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::String("1".to_string()),
                    expires_at: None,
                },
            );
            return Some(1);
        };

        match &mut entry.value {
            Value::String(s) => {
                let incremented = s.parse::<i64>().ok()?.checked_add(1)?;
                *s = incremented.to_string();
                Some(incremented)
            }
            Value::Stream(_) => None,
        }
    }

    /// Snapshot of all keys. Entries that have expired but have not been
    /// read since are still included.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries.keys().cloned().collect()
    }

    /// The type of the live value at `key`, if any
    pub fn kind(&self, key: &str) -> Option<ValueKind> {
        let mut entries = self.entries.lock().unwrap();
        live_entry(&mut entries, key).map(|entry| entry.value.kind())
    }

    /// Append an entry to the stream at `key`, creating the stream if the
    /// key is absent. The ID string is resolved against the stream's state.
    pub fn xadd(
        &self,
        key: &str,
        id_text: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StreamWriteError> {
        let mut entries = self.entries.lock().unwrap();

        // Drop an expired entry so the stream is recreated fresh.
        let now = now_ms();
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Stream(Stream::new()),
            expires_at: None,
        });

        let Value::Stream(stream) = &mut entry.value else {
            return Err(StreamWriteError::WrongType);
        };

        let id = stream
            .parse_entry_id(id_text, SeqDefault::Min)
            .map_err(StreamWriteError::InvalidId)?;
        stream.add(id, fields).map_err(StreamWriteError::Append)?;
        Ok(id)
    }

    /// Entries of the stream at `key` within the inclusive range given as
    /// bound strings; `-` and `+` denote open ends. A missing key reads as
    /// an empty stream.
    pub fn xrange(
        &self,
        key: &str,
        min_text: &str,
        max_text: &str,
    ) -> Result<Vec<StreamEntry>, StreamReadError> {
        let mut entries = self.entries.lock().unwrap();

        let entry = match live_entry(&mut entries, key) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let Value::Stream(stream) = &entry.value else {
            return Err(StreamReadError::WrongType);
        };

        let min = match min_text {
            "-" => None,
            text => Some(
                stream
                    .parse_entry_id(text, SeqDefault::Min)
                    .map_err(StreamReadError::InvalidId)?,
            ),
        };
        let max = match max_text {
            "+" => None,
            text => Some(
                stream
                    .parse_entry_id(text, SeqDefault::Max)
                    .map_err(StreamReadError::InvalidId)?,
            ),
        };

        Ok(stream.range(min, max))
    }

    /// Resolve an XREAD start ID for `key`. `$` means the stream's current
    /// tail; a missing or non-stream key resolves as an empty stream.
    pub fn resolve_read_start(
        &self,
        key: &str,
        text: &str,
    ) -> Result<StreamId, InvalidStreamId> {
        let mut entries = self.entries.lock().unwrap();

        let stream = match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Stream(stream),
                ..
            }) => Some(&*stream),
            _ => None,
        };

        if text == "$" {
            return Ok(stream.map(Stream::last_id).unwrap_or_else(StreamId::zero));
        }

        match stream {
            Some(stream) => stream.parse_entry_id(text, SeqDefault::Min),
            None => Stream::new().parse_entry_id(text, SeqDefault::Min),
        }
    }

    /// Entries of the stream at `key` strictly after `start`. A missing or
    /// non-stream key reads as empty.
    pub fn read_after(&self, key: &str, start: StreamId) -> Vec<StreamEntry> {
        let mut entries = self.entries.lock().unwrap();
        match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Stream(stream),
                ..
            }) => stream.read_after(start),
            _ => Vec::new(),
        }
    }

    /// Serialize the store as a snapshot for initial replication.
    ///
    /// Emits the fixed minimum-valid empty image; replicas catch up through
    /// the command stream that follows.
    pub fn dump(&self) -> Vec<u8> {
        rdb::empty_snapshot()
    }

    /// Number of keys currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Look up a key, removing it first if it has expired
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = now_ms();
    if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        store.set_string("k", "v", Expiry::Never);
        assert_eq!(store.get_string("k").unwrap(), Some("v".to_string()));
        assert_eq!(store.get_string("missing").unwrap(), None);
    }

    #[test]
    fn test_expiration() {
        let store = Store::new();
        store.set_string("k", "v", Expiry::RelativeMs(30));

        assert_eq!(store.get_string("k").unwrap(), Some("v".to_string()));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get_string("k").unwrap(), None);
        // The expired read removed the entry.
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_absolute_expiry_in_the_past() {
        let store = Store::new();
        store.set_string("k", "v", Expiry::AtMs(1));
        assert_eq!(store.get_string("k").unwrap(), None);
    }

    #[test]
    fn test_keys_does_not_filter_expired() {
        let store = Store::new();
        store.set_string("k", "v", Expiry::AtMs(1));
        // Not read yet, so still listed.
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_set_overwrites_any_type() {
        let store = Store::new();
        store.xadd("k", "1-1", vec![("a".into(), "b".into())]).unwrap();
        store.set_string("k", "v", Expiry::Never);
        assert_eq!(store.kind("k"), Some(ValueKind::String));
    }

    #[test]
    fn test_get_stream_is_wrong_type() {
        let store = Store::new();
        store.xadd("s", "1-1", vec![("a".into(), "b".into())]).unwrap();
        assert_eq!(store.get_string("s"), Err(WrongType));
    }

    #[test]
    fn test_increment() {
        let store = Store::new();
        assert_eq!(store.increment("n"), Some(1));
        assert_eq!(store.increment("n"), Some(2));
        assert_eq!(store.get_string("n").unwrap(), Some("2".to_string()));

        store.set_string("s", "not a number", Expiry::Never);
        assert_eq!(store.increment("s"), None);

        store.set_string("neg", "-3", Expiry::Never);
        assert_eq!(store.increment("neg"), Some(-2));

        store.xadd("st", "1-1", vec![("a".into(), "b".into())]).unwrap();
        assert_eq!(store.increment("st"), None);
    }

    #[test]
    fn test_increment_overflow() {
        let store = Store::new();
        store.set_string("n", i64::MAX.to_string(), Expiry::Never);
        assert_eq!(store.increment("n"), None);
    }

    #[test]
    fn test_kind() {
        let store = Store::new();
        assert_eq!(store.kind("nothing"), None);

        store.set_string("s", "v", Expiry::Never);
        assert_eq!(store.kind("s"), Some(ValueKind::String));

        store.xadd("st", "1-1", vec![("a".into(), "b".into())]).unwrap();
        assert_eq!(store.kind("st"), Some(ValueKind::Stream));
    }

    #[test]
    fn test_xadd_creates_stream_lazily() {
        let store = Store::new();
        let id = store
            .xadd("s", "1-1", vec![("f".into(), "v".into())])
            .unwrap();
        assert_eq!(id, StreamId::new(1, 1));
        assert_eq!(store.kind("s"), Some(ValueKind::Stream));
    }

    #[test]
    fn test_xadd_against_string_is_wrong_type() {
        let store = Store::new();
        store.set_string("k", "v", Expiry::Never);
        assert_eq!(
            store.xadd("k", "1-1", vec![("a".into(), "b".into())]),
            Err(StreamWriteError::WrongType)
        );
    }

    #[test]
    fn test_xadd_rejects_stale_id() {
        let store = Store::new();
        store.xadd("s", "2-1", vec![("a".into(), "b".into())]).unwrap();
        assert_eq!(
            store.xadd("s", "2-1", vec![("a".into(), "b".into())]),
            Err(StreamWriteError::Append(AppendError::IdNotGreater))
        );
        assert_eq!(
            store.xadd("s", "0-0", vec![("a".into(), "b".into())]),
            Err(StreamWriteError::Append(AppendError::IdZero))
        );
    }

    #[test]
    fn test_xrange_through_store() {
        let store = Store::new();
        store.xadd("s", "1-1", vec![("a".into(), "1".into())]).unwrap();
        store.xadd("s", "2-1", vec![("a".into(), "2".into())]).unwrap();

        let all = store.xrange("s", "-", "+").unwrap();
        assert_eq!(all.len(), 2);

        let from_two = store.xrange("s", "2", "+").unwrap();
        assert_eq!(from_two.len(), 1);
        assert_eq!(from_two[0].id, StreamId::new(2, 1));

        assert!(store.xrange("missing", "-", "+").unwrap().is_empty());

        store.set_string("str", "v", Expiry::Never);
        assert_eq!(
            store.xrange("str", "-", "+"),
            Err(StreamReadError::WrongType)
        );
    }

    #[test]
    fn test_resolve_read_start() {
        let store = Store::new();
        store.xadd("s", "3-7", vec![("a".into(), "b".into())]).unwrap();

        assert_eq!(
            store.resolve_read_start("s", "$").unwrap(),
            StreamId::new(3, 7)
        );
        assert_eq!(
            store.resolve_read_start("s", "1-2").unwrap(),
            StreamId::new(1, 2)
        );
        // Missing key: $ resolves to the empty tail.
        assert_eq!(
            store.resolve_read_start("missing", "$").unwrap(),
            StreamId::zero()
        );
    }

    #[test]
    fn test_read_after_through_store() {
        let store = Store::new();
        store.xadd("s", "1-1", vec![("a".into(), "1".into())]).unwrap();
        store.xadd("s", "1-2", vec![("a".into(), "2".into())]).unwrap();

        let entries = store.read_after("s", StreamId::new(1, 1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, StreamId::new(1, 2));

        assert!(store.read_after("missing", StreamId::zero()).is_empty());
    }

    #[test]
    fn test_dump_is_a_valid_snapshot() {
        let store = Store::new();
        let image = store.dump();
        assert!(image.starts_with(b"REDIS"));
        assert!(image.len() > 9);
    }
}
