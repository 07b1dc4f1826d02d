//! Append-only stream implementation
//!
//! A stream is an ordered log of entries keyed by a two-part ID
//! (milliseconds, sequence number). Entries are kept in insertion order,
//! which the append path enforces to also be ID order.

use std::collections::HashMap;
use std::fmt::{self, Display};

use super::now_ms;

/// A stream entry ID: a (milliseconds, sequence) pair ordered
/// lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// The smallest possible ID, also the sentinel tail of an empty stream
    pub fn zero() -> Self {
        StreamId { ms: 0, seq: 0 }
    }

    /// The ID immediately after this one
    pub fn successor(&self) -> Self {
        StreamId {
            ms: self.ms,
            seq: self.seq.saturating_add(1),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.ms == 0 && self.seq == 0
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Which sequence number an ID without one resolves to
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SeqDefault {
    Min,
    Max,
}

/// Failure to parse an entry-ID string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStreamId;

impl Display for InvalidStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid stream ID specified as stream command argument")
    }
}

/// Why an append was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    /// The ID 0-0 is never allowed
    IdZero,

    /// The ID is not strictly greater than the stream's tail
    IdNotGreater,
}

impl Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::IdZero => {
                write!(f, "The ID specified in XADD must be greater than 0-0")
            }
            AppendError::IdNotGreater => write!(
                f,
                "The ID specified in XADD is equal or smaller than the target stream top item"
            ),
        }
    }
}

/// A single stream entry: an ID plus its field/value pairs in argument order
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

/// An append-only log of entries with strictly increasing IDs
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: Vec<StreamEntry>,
    /// Last sequence number used per milliseconds part, for `<ms>-*` IDs
    last_seq_for_ms: HashMap<u64, u64>,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    /// Resolve an entry-ID string against this stream's state.
    ///
    /// Accepted forms:
    /// - `*` — current wall clock in milliseconds, sequence 0.
    /// - `<ms>` — sequence 0 or u64::MAX depending on `default`.
    /// - `<ms>-*` — one past the last sequence used for that milliseconds
    ///   value; 1 when ms is 0 and unused, 0 otherwise.
    /// - `<ms>-<seq>` — the literal pair.
    pub fn parse_entry_id(
        &self,
        text: &str,
        default: SeqDefault,
    ) -> Result<StreamId, InvalidStreamId> {
        if text == "*" {
            return Ok(StreamId::new(now_ms(), 0));
        }

        let Some((ms_text, seq_text)) = text.split_once('-') else {
            let ms = text.parse::<u64>().map_err(|_| InvalidStreamId)?;
            let seq = match default {
                SeqDefault::Min => 0,
                SeqDefault::Max => u64::MAX,
            };
            return Ok(StreamId::new(ms, seq));
        };

        let ms = ms_text.parse::<u64>().map_err(|_| InvalidStreamId)?;

        let seq = if seq_text == "*" {
            match self.last_seq_for_ms.get(&ms) {
                Some(last) => last + 1,
                None if ms == 0 => 1,
                None => 0,
            }
        } else {
            seq_text.parse::<u64>().map_err(|_| InvalidStreamId)?
        };

        Ok(StreamId::new(ms, seq))
    }

    /// Append an entry. The ID must be strictly greater than the current
    /// tail and must not be 0-0.
    pub fn add(
        &mut self,
        id: StreamId,
        fields: Vec<(String, String)>,
    ) -> Result<(), AppendError> {
        if id.is_zero() {
            return Err(AppendError::IdZero);
        }
        if id <= self.last_id() {
            return Err(AppendError::IdNotGreater);
        }

        self.last_seq_for_ms.insert(id.ms, id.seq);
        self.entries.push(StreamEntry { id, fields });
        Ok(())
    }

    /// All entries with `min <= id <= max`, in ID order.
    ///
    /// An absent `min` means 0-0; an absent `max` means one past the tail.
    pub fn range(&self, min: Option<StreamId>, max: Option<StreamId>) -> Vec<StreamEntry> {
        let min = min.unwrap_or_else(StreamId::zero);
        let max = max.unwrap_or_else(|| self.last_id().successor());

        self.entries
            .iter()
            .filter(|entry| min <= entry.id && entry.id <= max)
            .cloned()
            .collect()
    }

    /// All entries strictly after `start`, in ID order
    pub fn read_after(&self, start: StreamId) -> Vec<StreamEntry> {
        self.range(Some(start.successor()), None)
    }

    /// The greatest inserted ID, or 0-0 when the stream is empty
    pub fn last_id(&self) -> StreamId {
        self.entries
            .last()
            .map(|entry| entry.id)
            .unwrap_or_else(StreamId::zero)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
