//! Chunked (DASH) ingest sequencing.
//!
//! The encoder under test uploads one manifest, one initialization header and
//! then media chunks, strictly in that order, over a single session. Nothing
//! in a chunked upload says which of the three it is, so the position in the
//! session decides the output name:
//!
//! | index | file |
//! |---|---|
//! | 0 | `<stream>.mpd` |
//! | 1 | `<stream>_<stream>.hdr` |
//! | k >= 2 | `<stream>_<stream>_<k-1>.chk` |
//!
//! The counter lives in a [`SequenceState`] behind an async mutex. A
//! [`SequenceSession`] holds that mutex for the whole "issue index, write
//! file, advance index" region, which serializes concurrent uploads.

use tokio::sync::{Mutex, MutexGuard};

use crate::{Error, Result};

/// Kind of a chunked-ingest segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SegmentKind {
    Manifest,
    Header,
    Chunk,
}

impl SegmentKind {
    /// Kind implied by a position in the session.
    pub fn for_index(index: u64) -> Self {
        match index {
            0 => Self::Manifest,
            1 => Self::Header,
            _ => Self::Chunk,
        }
    }

    /// Kind suggested by a client-supplied content id.
    ///
    /// The encoder labels its uploads `manifest`, `<name>.mpd`,
    /// `<name>_<id>.hdr` and `<name>_<id>_<n>.chk`. Anything else gives no hint.
    pub fn from_content_id(content_id: &str) -> Option<Self> {
        let id = content_id.to_ascii_lowercase();
        if id == "manifest" || id.ends_with(".mpd") {
            Some(Self::Manifest)
        } else if id.ends_with(".hdr") {
            Some(Self::Header)
        } else if id.ends_with(".chk") {
            Some(Self::Chunk)
        } else {
            None
        }
    }
}

/// Output file name for a sequence index.
pub fn segment_file_name(stream_name: &str, index: u64) -> String {
    match index {
        0 => format!("{stream_name}.mpd"),
        1 => format!("{stream_name}_{stream_name}.hdr"),
        k => format!("{stream_name}_{stream_name}_{}.chk", k - 1),
    }
}

/// Process-lifetime sequence counter.
#[derive(Debug, Default)]
pub struct SequenceState {
    next_index: u64,
}

impl SequenceState {
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

/// A sequence index issued to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSlot {
    pub index: u64,
    pub kind: SegmentKind,
    pub file_name: String,
}

/// Owns the sequence state for one server instance.
#[derive(Debug)]
pub struct SegmentSequencer {
    stream_name: String,
    state: Mutex<SequenceState>,
}

impl SegmentSequencer {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            state: Mutex::new(SequenceState::default()),
        }
    }

    /// Enter the serialized region.
    ///
    /// Waiters are admitted in FIFO order, so requests that reach this point
    /// first are numbered first.
    pub async fn begin(&self) -> SequenceSession<'_> {
        SequenceSession {
            state: self.state.lock().await,
            stream_name: &self.stream_name,
            issued: None,
        }
    }

    /// Whether a chunked upload currently holds the sequencer.
    pub fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Index the next chunked upload will receive.
    pub async fn current_index(&self) -> u64 {
        self.state.lock().await.next_index()
    }
}

/// Exclusive access to the sequence counter for a single request.
#[derive(Debug)]
pub struct SequenceSession<'a> {
    state: MutexGuard<'a, SequenceState>,
    stream_name: &'a str,
    issued: Option<u64>,
}

impl SequenceSession<'_> {
    /// Issue the current index and its destination name.
    ///
    /// Fails without touching the counter when the session already issued a
    /// slot, or when `hint` names a different kind than the position implies.
    pub fn next(&mut self, hint: Option<SegmentKind>) -> Result<SequenceSlot> {
        if let Some(issued) = self.issued {
            return Err(Error::sequence(format!(
                "sequence index {issued} was already issued to this upload"
            )));
        }

        let index = self.state.next_index;
        let kind = SegmentKind::for_index(index);
        if let Some(hint) = hint
            && hint != kind
        {
            return Err(Error::sequence(format!(
                "out of order upload: expected {kind} at sequence index {index}, client sent {hint}"
            )));
        }

        self.issued = Some(index);
        Ok(SequenceSlot {
            index,
            kind,
            file_name: segment_file_name(self.stream_name, index),
        })
    }

    /// Advance the counter past `slot` once its file is written.
    ///
    /// Returns the new counter value.
    pub fn commit(&mut self, slot: &SequenceSlot) -> Result<u64> {
        let current = self.state.next_index;
        if self.issued != Some(slot.index) || slot.index != current {
            return Err(Error::sequence(format!(
                "cannot commit sequence index {} while the counter is at {current}",
                slot.index
            )));
        }
        self.state.next_index += 1;
        Ok(self.state.next_index)
    }
}
