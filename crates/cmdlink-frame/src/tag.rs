//! Request tags and the bounded pool they are drawn from.

use std::collections::VecDeque;
use std::fmt;

/// Characters a tag may take. Tags rotate through this alphabet in order.
pub const TAG_ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// One-byte correlation tag echoed back by the device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u8);

impl Tag {
    /// Wrap a raw tag byte as it appeared on the wire.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The raw tag byte.
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Whether this tag belongs to [`TAG_ALPHABET`].
    pub fn is_allocatable(self) -> bool {
        TAG_ALPHABET.contains(&self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "{:#04x}", self.0)
        }
    }
}

/// Bounded free-list of tags.
///
/// At most `capacity` tags are live at once; a tag is only handed out again
/// after it has been released. Released tags go to the back of the free list,
/// so allocation keeps rotating through the whole alphabet.
#[derive(Debug, Clone)]
pub struct TagPool {
    free: VecDeque<u8>,
    live: [bool; 256],
    live_count: usize,
    capacity: usize,
}

impl TagPool {
    /// Create a pool allowing `capacity` live tags, clamped to `1..=52`.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: TAG_ALPHABET.iter().copied().collect(),
            live: [false; 256],
            live_count: 0,
            capacity: capacity.clamp(1, TAG_ALPHABET.len()),
        }
    }

    /// Take the next tag in rotation, or `None` when the pool is exhausted.
    pub fn acquire(&mut self) -> Option<Tag> {
        if self.live_count >= self.capacity {
            return None;
        }
        let byte = self.free.pop_front()?;
        self.live[byte as usize] = true;
        self.live_count += 1;
        Some(Tag(byte))
    }

    /// Claim a specific tag. Fails if it is live, foreign, or the pool is full.
    pub fn reserve(&mut self, tag: Tag) -> bool {
        if self.live[tag.0 as usize] || self.live_count >= self.capacity {
            return false;
        }
        let Some(pos) = self.free.iter().position(|&b| b == tag.0) else {
            return false;
        };
        self.free.remove(pos);
        self.live[tag.0 as usize] = true;
        self.live_count += 1;
        true
    }

    /// Return a tag to the pool. Releasing a tag that is not live is ignored.
    pub fn release(&mut self, tag: Tag) {
        if !self.live[tag.0 as usize] {
            return;
        }
        self.live[tag.0 as usize] = false;
        self.live_count -= 1;
        self.free.push_back(tag.0);
    }

    /// Whether `tag` is currently live.
    pub fn is_live(&self, tag: Tag) -> bool {
        self.live[tag.0 as usize]
    }

    /// Number of live tags.
    pub fn live(&self) -> usize {
        self.live_count
    }

    /// Maximum number of live tags.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
