//! Multi-part messages
//!
//! Every outbound message is cut into fragments so that
//! `channel bytes + fragment bytes <= MAX_MESSAGE_SIZE`, and each fragment
//! travels as `{id}_{part}-{total}_{fragment}` with a 1-based `part`.
//! Receivers buffer fragments per id and join them by ascending part index
//! once every part has arrived.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::trace;

use crate::MAX_MESSAGE_SIZE;

/// One fragment of a logical message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub message_id: String,
    /// 1-based index
    pub index: u32,
    pub total: u32,
    pub fragment: String,
}

impl Part {
    /// Parse `{id}_{part}-{total}_{fragment}`.
    ///
    /// Returns `None` when the payload does not have that shape, in which
    /// case it is a single-part message (announcement channels send those).
    pub fn parse(payload: &str) -> Option<Part> {
        let (message_id, rest) = payload.split_once('_')?;
        let (index, rest) = rest.split_once('-')?;
        let (total, fragment) = rest.split_once('_')?;

        if message_id.is_empty() {
            return None;
        }

        Some(Part {
            message_id: message_id.to_string(),
            index: index.parse().ok()?,
            total: total.parse().ok()?,
            fragment: fragment.to_string(),
        })
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}-{}_{}",
            self.message_id, self.index, self.total, self.fragment
        )
    }
}

/// Cut `message` into fragments that fit next to `channel` in one frame.
///
/// `\r\n` is normalised to `\n` first. Cuts never split a UTF-8 character.
/// An empty message yields no fragments.
pub fn split_message(channel: &str, message: &str) -> Vec<String> {
    let message = message.replace("\r\n", "\n");
    let budget = MAX_MESSAGE_SIZE.saturating_sub(channel.len()).max(1);

    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < message.len() {
        let mut end = (pos + budget).min(message.len());
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        if end == pos {
            // A single character wider than the budget still has to go out.
            end = pos + 1;
            while !message.is_char_boundary(end) {
                end += 1;
            }
        }
        parts.push(message[pos..end].to_string());
        pos = end;
    }
    parts
}

/// Build the wire parts of a message under a fresh random id
pub fn build_parts(channel: &str, message: &str) -> Vec<Part> {
    let message_id = crate::generate_id(crate::MESSAGE_ID_LENGTH);
    let fragments = split_message(channel, message);
    let total = fragments.len() as u32;

    fragments
        .into_iter()
        .enumerate()
        .map(|(i, fragment)| Part {
            message_id: message_id.clone(),
            index: i as u32 + 1,
            total,
            fragment,
        })
        .collect()
}

#[derive(Debug)]
struct PendingMessage {
    total: u32,
    parts: BTreeMap<u32, String>,
}

/// Buffers fragments until a message is complete.
///
/// Safe to share between the receive path and reconnect handling.
#[derive(Debug, Default)]
pub struct MultiPartReassembler {
    pending: Mutex<HashMap<String, PendingMessage>>,
}

impl MultiPartReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment.
    ///
    /// An empty `message_id` marks a single-part message, returned as is.
    /// Otherwise the fragment is buffered and the joined message is returned
    /// once the number of distinct parts equals `total`. Repeated indices
    /// keep the first fragment seen.
    pub fn feed(&self, message_id: &str, index: u32, total: u32, fragment: &str) -> Option<String> {
        if message_id.is_empty() {
            return Some(fragment.to_string());
        }

        if index == 0 || total == 0 || index > total {
            trace!(
                "Dropping fragment {}/{} of message {}: index out of range",
                index,
                total,
                message_id
            );
            return None;
        }

        let mut pending = self.pending.lock();
        let entry = pending
            .entry(message_id.to_string())
            .or_insert_with(|| PendingMessage {
                total,
                parts: BTreeMap::new(),
            });
        entry
            .parts
            .entry(index)
            .or_insert_with(|| fragment.to_string());

        if entry.parts.len() as u32 != entry.total {
            trace!(
                "Buffered part {} of {} for message {}",
                index,
                entry.total,
                message_id
            );
            return None;
        }

        pending
            .remove(message_id)
            .map(|complete| complete.parts.into_values().collect())
    }

    /// Feed a parsed [`Part`]
    pub fn feed_part(&self, part: &Part) -> Option<String> {
        self.feed(&part.message_id, part.index, part.total, &part.fragment)
    }

    /// Number of messages with missing parts
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every partial message
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}
