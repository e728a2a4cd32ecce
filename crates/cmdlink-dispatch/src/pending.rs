//! Requests in flight and the time-ordered table of those awaiting a response.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cmdlink_frame::{EncodedCommand, ResponseKey};

use crate::error::RequestError;
use crate::handle::Completer;

/// A submitted command and what to do with its answer.
pub(crate) struct Request {
    pub(crate) command: EncodedCommand,
    /// Resends performed so far.
    pub(crate) attempts: u32,
    completer: Completer,
}

impl Request {
    pub(crate) fn new(command: EncodedCommand, completer: Completer) -> Self {
        Self {
            command,
            attempts: 0,
            completer,
        }
    }

    pub(crate) fn key(&self) -> ResponseKey {
        self.command.key
    }

    /// Settle the caller's handle. Consumes the request.
    pub(crate) fn finish(self, outcome: Result<Bytes, RequestError>) {
        (self.completer)(outcome);
    }
}

/// A request that has been written and is waiting for its response.
pub(crate) struct PendingRequest {
    pub(crate) request: Request,
    pub(crate) sent_at: Instant,
}

/// Read-only view of one pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub key: ResponseKey,
    pub attempts: u32,
    pub sent_at: Instant,
}

/// Outcome of a successful match.
pub(crate) struct Matched {
    pub(crate) request: Request,
    /// Older entries passed over to reach the match, oldest first.
    pub(crate) skipped: Vec<Request>,
}

/// Pending requests ordered by send time, oldest first.
///
/// The device answers in order, so both timeout expiry and response
/// matching start from the head.
pub(crate) struct PendingTable {
    entries: VecDeque<PendingRequest>,
    capacity: usize,
}

impl PendingTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// File a request sent at `sent_at`. Hands it back if the table is full.
    pub(crate) fn insert(&mut self, request: Request, sent_at: Instant) -> Result<(), Request> {
        if self.entries.len() >= self.capacity {
            return Err(request);
        }
        let pos = self.entries.partition_point(|entry| entry.sent_at <= sent_at);
        self.entries.insert(pos, PendingRequest { request, sent_at });
        Ok(())
    }

    /// Pop the head if it has waited longer than `timeout` at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant, timeout: Duration) -> Option<PendingRequest> {
        let head = self.entries.front()?;
        if now.saturating_duration_since(head.sent_at) > timeout {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Remove the oldest entry matching `key` together with every older entry.
    ///
    /// Leaves the table untouched when nothing matches.
    pub(crate) fn take_match(&mut self, key: ResponseKey) -> Option<Matched> {
        let pos = self.position(key)?;
        let skipped = self
            .entries
            .drain(..pos)
            .map(|entry| entry.request)
            .collect();
        let request = self.entries.pop_front()?.request;
        Some(Matched { request, skipped })
    }

    /// Remove only the oldest entry matching `key`.
    pub(crate) fn remove_match(&mut self, key: ResponseKey) -> Option<Request> {
        let pos = self.position(key)?;
        self.entries.remove(pos).map(|entry| entry.request)
    }

    fn position(&self, key: ResponseKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.request.key() == key)
    }

    /// When the head entry will expire.
    pub(crate) fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.entries.front().map(|entry| entry.sent_at + timeout)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingSnapshot> {
        self.entries
            .iter()
            .map(|entry| PendingSnapshot {
                key: entry.request.key(),
                attempts: entry.request.attempts,
                sent_at: entry.sent_at,
            })
            .collect()
    }

    /// Empty the table, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Request> + '_ {
        self.entries.drain(..).map(|entry| entry.request)
    }
}

#[cfg(test)]
mod tests {
    use cmdlink_frame::{Command, Tag};

    use super::*;

    fn request(tag: u8) -> Request {
        let command = Command::text(b'E', &[])
            .with_tag(Tag::from_byte(tag))
            .unwrap();
        Request::new(command, Box::new(|_| {}))
    }

    fn key(tag: u8) -> ResponseKey {
        ResponseKey::new(b'e', Tag::from_byte(tag))
    }

    fn tags(table: &PendingTable) -> Vec<u8> {
        table.snapshot().iter().map(|s| s.key.tag.byte()).collect()
    }

    #[test]
    fn keeps_send_order_even_for_out_of_order_inserts() {
        let t0 = Instant::now();
        let mut table = PendingTable::new(8);
        table.insert(request(b'b'), t0 + Duration::from_millis(5)).ok().unwrap();
        table.insert(request(b'a'), t0).ok().unwrap();
        table.insert(request(b'c'), t0 + Duration::from_millis(5)).ok().unwrap();

        assert_eq!(tags(&table), b"abc");
    }

    #[test]
    fn rejects_past_capacity() {
        let now = Instant::now();
        let mut table = PendingTable::new(1);
        assert!(table.insert(request(b'a'), now).is_ok());
        let rejected = table.insert(request(b'b'), now).unwrap_err();
        assert_eq!(rejected.key(), key(b'b'));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn head_match_skips_nothing() {
        let now = Instant::now();
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), now).ok().unwrap();
        table.insert(request(b'b'), now).ok().unwrap();

        let matched = table.take_match(key(b'a')).unwrap();
        assert_eq!(matched.request.key(), key(b'a'));
        assert!(matched.skipped.is_empty());
        assert_eq!(tags(&table), b"b");
    }

    #[test]
    fn match_behind_head_pops_lost_requests() {
        let now = Instant::now();
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), now).ok().unwrap();
        table.insert(request(b'b'), now).ok().unwrap();
        table.insert(request(b'c'), now).ok().unwrap();

        let matched = table.take_match(key(b'b')).unwrap();
        assert_eq!(matched.request.key(), key(b'b'));
        let skipped: Vec<_> = matched.skipped.iter().map(Request::key).collect();
        assert_eq!(skipped, vec![key(b'a')]);
        assert_eq!(tags(&table), b"c");
    }

    #[test]
    fn unmatched_key_leaves_table_identical() {
        let t0 = Instant::now();
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), t0).ok().unwrap();
        let mut retried = request(b'b');
        retried.attempts = 3;
        table.insert(retried, t0 + Duration::from_millis(1)).ok().unwrap();

        let before = table.snapshot();
        assert!(table.take_match(key(b'x')).is_none());
        assert!(table.take_match(ResponseKey::new(b'd', Tag::from_byte(b'a'))).is_none());
        assert_eq!(table.snapshot(), before);
    }

    #[test]
    fn remove_match_keeps_older_entries() {
        let now = Instant::now();
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), now).ok().unwrap();
        table.insert(request(b'b'), now).ok().unwrap();

        assert_eq!(table.remove_match(key(b'b')).unwrap().key(), key(b'b'));
        assert_eq!(tags(&table), b"a");
    }

    #[test]
    fn expiry_only_pops_stale_head() {
        let t0 = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), t0).ok().unwrap();
        table.insert(request(b'b'), t0 + Duration::from_millis(80)).ok().unwrap();

        assert!(table.pop_expired(t0 + timeout, timeout).is_none());

        let now = t0 + Duration::from_millis(150);
        assert_eq!(table.pop_expired(now, timeout).unwrap().request.key(), key(b'a'));
        assert!(table.pop_expired(now, timeout).is_none());
        assert_eq!(table.next_deadline(timeout), Some(t0 + Duration::from_millis(180)));
    }

    #[test]
    fn drain_empties_in_order() {
        let now = Instant::now();
        let mut table = PendingTable::new(4);
        table.insert(request(b'a'), now).ok().unwrap();
        table.insert(request(b'b'), now).ok().unwrap();

        let drained: Vec<_> = table.drain().map(|r| r.key()).collect();
        assert_eq!(drained, vec![key(b'a'), key(b'b')]);
        assert_eq!(table.len(), 0);
    }
}
