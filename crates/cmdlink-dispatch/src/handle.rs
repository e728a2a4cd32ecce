//! Caller-facing result handles.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cmdlink_frame::ResponseKey;

use crate::error::RequestError;

/// Type-erased completion stored with a pending request.
///
/// Runs the request's parse function on a payload (or forwards the error)
/// and settles the typed [`Handle`].
pub(crate) type Completer = Box<dyn FnOnce(Result<Bytes, RequestError>) + Send>;

enum Slot<T> {
    Pending,
    Ready(Result<T, RequestError>),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// The eventual result of one submitted command.
///
/// Cloning a handle shares the same slot. The slot is settled exactly once;
/// every waiter is woken and later waits return the cached result.
pub struct Handle<T> {
    shared: Arc<Shared<T>>,
    key: ResponseKey,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            key: self.key,
        }
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(key: ResponseKey) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Pending),
                ready: Condvar::new(),
            }),
            key,
        }
    }

    /// The response key this request is waiting for.
    pub fn key(&self) -> ResponseKey {
        self.key
    }

    /// Whether the request has been resolved or failed.
    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), Slot::Ready(_))
    }

    /// Settle with a value. Returns `false` if already settled.
    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub(crate) fn fail(&self, error: RequestError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, result: Result<T, RequestError>) -> bool {
        let mut slot = self.lock();
        if matches!(*slot, Slot::Ready(_)) {
            return false;
        }
        *slot = Slot::Ready(result);
        drop(slot);
        self.shared.ready.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Handle<T> {
    /// Block until the request settles and return its result.
    ///
    /// Calling again returns the same cached result immediately. A request
    /// still queued when its dispatcher was stopped never settles.
    pub fn wait(&self) -> Result<T, RequestError> {
        let mut slot = self.lock();
        loop {
            if let Slot::Ready(result) = &*slot {
                return result.clone();
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, RequestError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Slot::Ready(result) = &*slot {
                return Some(result.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The result if the request has settled, without blocking.
    pub fn try_result(&self) -> Option<Result<T, RequestError>> {
        match &*self.lock() {
            Slot::Ready(result) => Some(result.clone()),
            Slot::Pending => None,
        }
    }
}

impl<T: Send + 'static> Handle<T> {
    /// Build the completer that parses a payload into this handle.
    pub(crate) fn completer<F, E>(&self, parse: F) -> Completer
    where
        F: FnOnce(Bytes) -> Result<T, E> + Send + 'static,
        E: fmt::Display,
    {
        let handle = self.clone();
        Box::new(move |outcome| {
            let settled = match outcome {
                Ok(payload) => match parse(payload) {
                    Ok(value) => handle.resolve(value),
                    Err(err) => handle.fail(RequestError::Parse(err.to_string())),
                },
                Err(err) => handle.fail(err),
            };
            if !settled {
                tracing::debug!(tag = %handle.key.tag, "request already settled");
            }
        })
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use cmdlink_frame::Tag;

    use super::*;

    fn key() -> ResponseKey {
        ResponseKey::new(b'e', Tag::from_byte(b'a'))
    }

    #[test]
    fn resolves_once() {
        let handle = Handle::new(key());
        assert!(handle.resolve(1));
        assert!(!handle.resolve(2));
        assert!(!handle.fail(RequestError::RetryExhausted { retries: 1 }));
        assert_eq!(handle.wait(), Ok(1));
    }

    #[test]
    fn repeated_wait_returns_cached_value_without_reparsing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle: Handle<(i64, i64)> = Handle::new(key());
        let counter = Arc::clone(&calls);
        let completer = handle.completer(move |payload: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8_lossy(&payload).to_string();
            let (l, r) = text.split_once(',').ok_or("missing comma")?;
            Ok::<_, Box<dyn std::error::Error>>((l.parse()?, r.parse()?))
        });

        completer(Ok(Bytes::from_static(b"100,100")));

        assert_eq!(handle.wait(), Ok((100, 100)));
        assert_eq!(handle.wait(), Ok((100, 100)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_failure_becomes_request_error() {
        let handle: Handle<u8> = Handle::new(key());
        let completer = handle.completer(|_payload: Bytes| Err::<u8, _>("bad payload"));
        completer(Ok(Bytes::new()));

        assert_eq!(
            handle.try_result(),
            Some(Err(RequestError::Parse("bad payload".to_string())))
        );
    }

    #[test]
    fn errors_are_cached_too() {
        let handle: Handle<u8> = Handle::new(key());
        handle.fail(RequestError::RetryExhausted { retries: 2 });

        let expected = Err(RequestError::RetryExhausted { retries: 2 });
        assert_eq!(handle.wait(), expected);
        assert_eq!(handle.wait(), expected);
    }

    #[test]
    fn wakes_every_waiter() {
        let handle: Handle<u32> = Handle::new(key());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        handle.resolve(7);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(7));
        }
    }

    #[test]
    fn pending_handle_times_out() {
        let handle: Handle<u32> = Handle::new(key());
        assert!(!handle.is_done());
        assert_eq!(handle.try_result(), None);
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
    }
}
