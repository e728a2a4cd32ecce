//! The dispatcher thread and its caller-side front.

use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Write};
use std::os::fd::AsFd;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cmdlink_frame::{
    write_command, Command, EncodedCommand, FrameError, FrameReader, ResponseFrame, ResponseKey,
    TagPool,
};
use cmdlink_transport::{wait_readable, Transport, TransportError};
use tracing::{debug, error, info, info_span, trace, warn};

use crate::config::{DesyncPolicy, DispatcherConfig};
use crate::error::{LinkError, RequestError, Result};
use crate::handle::Handle;
use crate::pending::{PendingTable, Request};
use crate::wakeup::{self, Signal, WakeupReceiver, WakeupSender};

/// Asynchronous front to a device.
///
/// Owns a dedicated thread that is the only reader and writer of the
/// transport. Submissions are bounded by the tag pool: when every tag is in
/// flight, [`submit`](Self::submit) fails with [`LinkError::QueueFull`]
/// instead of blocking.
///
/// [`stop`](Self::stop) is cooperative. Commands signalled before the stop
/// are still written; requests left pending or queued at that point are
/// never settled. Dropping the dispatcher stops and joins it.
pub struct Dispatcher {
    submissions: SyncSender<Request>,
    wakeup: WakeupSender,
    tags: Arc<Mutex<TagPool>>,
    capacity: usize,
    label: String,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Dispatcher {
    /// Take ownership of `transport` and start the dispatcher thread.
    pub fn spawn<T>(mut transport: T, config: DispatcherConfig) -> Result<Self>
    where
        T: Transport + 'static,
    {
        if let Some(wake) = &config.wake_sequence {
            transport.write_all(wake).map_err(TransportError::Io)?;
            transport.flush().map_err(TransportError::Io)?;
        }

        let capacity = config.in_flight_capacity();
        let tags = Arc::new(Mutex::new(TagPool::new(capacity)));
        let (submissions, queue) = mpsc::sync_channel(capacity);
        let (wakeup, signals) = wakeup::channel().map_err(TransportError::Io)?;

        let reactor = Reactor::new(transport, signals, queue, Arc::clone(&tags), &config);
        let span = info_span!(parent: &config.span, "dispatcher", device = %config.label);
        let thread = std::thread::Builder::new()
            .name(format!("cmdlink-{}", config.label))
            .spawn(move || {
                let _entered = span.enter();
                reactor.run()
            })
            .map_err(TransportError::Io)?;

        Ok(Self {
            submissions,
            wakeup,
            tags,
            capacity,
            label: config.label,
            thread: Some(thread),
        })
    }

    /// Queue `command` under the next free tag.
    ///
    /// `parse` turns the response payload into the handle's value. It runs
    /// at most once, on the dispatcher thread, and should be side-effect free.
    pub fn submit<V, F, E>(&self, command: &Command, parse: F) -> Result<Handle<V>>
    where
        V: Send + 'static,
        F: FnOnce(Bytes) -> std::result::Result<V, E> + Send + 'static,
        E: fmt::Display,
    {
        let tag = self.lock_tags().acquire().ok_or(LinkError::QueueFull {
            capacity: self.capacity,
        })?;
        let encoded = match command.with_tag(tag) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.lock_tags().release(tag);
                return Err(err.into());
            }
        };
        self.enqueue(encoded, parse)
    }

    /// Queue `command` and resolve with the raw payload.
    pub fn send(&self, command: &Command) -> Result<Handle<Bytes>> {
        self.submit(command, Ok::<Bytes, std::convert::Infallible>)
    }

    /// Queue pre-encoded bytes that answer to `key`.
    ///
    /// The tag in `key` is reserved until the request settles. A tag that is
    /// already live, or outside the tag alphabet, is rejected with
    /// [`LinkError::TagBusy`].
    pub fn submit_raw<V, F, E>(
        &self,
        bytes: impl Into<Bytes>,
        key: ResponseKey,
        parse: F,
    ) -> Result<Handle<V>>
    where
        V: Send + 'static,
        F: FnOnce(Bytes) -> std::result::Result<V, E> + Send + 'static,
        E: fmt::Display,
    {
        {
            let mut tags = self.lock_tags();
            if tags.live() >= tags.capacity() {
                return Err(LinkError::QueueFull {
                    capacity: self.capacity,
                });
            }
            if !tags.reserve(key.tag) {
                return Err(LinkError::TagBusy { tag: key.tag });
            }
        }
        let encoded = EncodedCommand {
            bytes: bytes.into(),
            key,
        };
        self.enqueue(encoded, parse)
    }

    fn enqueue<V, F, E>(&self, encoded: EncodedCommand, parse: F) -> Result<Handle<V>>
    where
        V: Send + 'static,
        F: FnOnce(Bytes) -> std::result::Result<V, E> + Send + 'static,
        E: fmt::Display,
    {
        let key = encoded.key;
        let handle = Handle::new(key);
        let request = Request::new(encoded, handle.completer(parse));

        match self.submissions.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.lock_tags().release(key.tag);
                return Err(LinkError::QueueFull {
                    capacity: self.capacity,
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                self.lock_tags().release(key.tag);
                return Err(LinkError::Stopped);
            }
        }

        if self.wakeup.notify(Signal::New).is_err() {
            // The reactor is gone; the queued request is dropped with it.
            self.lock_tags().release(key.tag);
            return Err(LinkError::Stopped);
        }
        debug!(device = %self.label, code = key.code, tag = %key.tag, "command queued");
        Ok(handle)
    }

    /// Ask the dispatcher thread to exit after its current iteration.
    pub fn stop(&self) -> Result<()> {
        self.wakeup
            .notify(Signal::Stop)
            .map_err(|_| LinkError::Stopped)
    }

    /// Wait for the dispatcher thread and return how it ended.
    ///
    /// `Ok(())` after [`stop`](Self::stop); the fatal error if the device
    /// stream failed.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| LinkError::Stopped)?,
            None => Ok(()),
        }
    }

    /// Requests queued or awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.lock_tags().live()
    }

    /// Maximum requests in flight at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_tags(&self) -> MutexGuard<'_, TagPool> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.wakeup.notify(Signal::Stop);
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    DrainingSignal,
    ReadingFrame,
    ScanningTimeouts,
    Stopped,
}

/// State owned by the dispatcher thread. Nothing here is shared except the
/// tag pool, which callers allocate from and the reactor releases into.
struct Reactor<T> {
    reader: FrameReader<T>,
    signals: WakeupReceiver,
    queue: Receiver<Request>,
    table: PendingTable,
    resend: VecDeque<Request>,
    tags: Arc<Mutex<TagPool>>,
    timeout: Duration,
    max_tries: u32,
    desync_policy: DesyncPolicy,
    running: bool,
    state: State,
}

impl<T: Transport> Reactor<T> {
    fn new(
        transport: T,
        signals: WakeupReceiver,
        queue: Receiver<Request>,
        tags: Arc<Mutex<TagPool>>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            reader: FrameReader::with_max_line_len(transport, config.max_line_len),
            signals,
            queue,
            table: PendingTable::new(config.in_flight_capacity()),
            resend: VecDeque::new(),
            tags,
            timeout: config.timeout,
            max_tries: config.max_tries,
            desync_policy: config.desync_policy,
            running: true,
            state: State::Waiting,
        }
    }

    fn run(mut self) -> Result<()> {
        info!(timeout = ?self.timeout, max_tries = self.max_tries, "dispatcher started");
        let outcome = self.run_loop();
        self.enter(State::Stopped);

        match &outcome {
            Ok(()) => {
                info!(pending = self.table.len(), "dispatcher stopped");
                if !self.table.is_empty() {
                    debug!(unresolved = ?self.table.snapshot(), "requests left pending at stop");
                }
            }
            Err(err) => {
                error!(%err, "dispatcher stopped on stream fault");
                self.fail_all(RequestError::Disconnected(err.to_string()));
            }
        }
        outcome
    }

    fn run_loop(&mut self) -> Result<()> {
        while self.running {
            self.scan_timeouts(Instant::now());
            self.flush_resends();

            self.enter(State::Waiting);
            let wait = self.next_wait(Instant::now());
            let ready = wait_readable(
                &[self.reader.get_ref().as_fd(), self.signals.as_fd()],
                Some(wait),
            )
            .map_err(TransportError::Io)?;
            let (device_ready, signal_ready) = (ready[0], ready[1]);

            if signal_ready {
                self.drain_signals()?;
            }
            if device_ready {
                self.read_frames()?;
            }
            self.flush_resends();
        }
        Ok(())
    }

    /// Sleep until just past the oldest entry's deadline, capped at the timeout.
    fn next_wait(&self, now: Instant) -> Duration {
        match self.table.next_deadline(self.timeout) {
            Some(deadline) => (deadline.saturating_duration_since(now) + Duration::from_millis(1))
                .min(self.timeout),
            None => self.timeout,
        }
    }

    fn drain_signals(&mut self) -> Result<()> {
        self.enter(State::DrainingSignal);
        let signals = self.signals.drain().map_err(TransportError::Io)?;
        trace!(count = signals.len(), "draining wakeup signals");

        for signal in signals {
            match signal {
                Signal::New => match self.queue.try_recv() {
                    Ok(request) => self.send_request(request),
                    Err(TryRecvError::Empty) => warn!("wakeup without a queued command"),
                    Err(TryRecvError::Disconnected) => self.running = false,
                },
                Signal::Stop => {
                    debug!("stop requested");
                    self.running = false;
                }
            }
        }
        Ok(())
    }

    /// Write a request and file it as pending. Failures settle only this request.
    fn send_request(&mut self, request: Request) {
        let key = request.key();
        if let Err(err) = write_command(self.reader.get_mut(), &request.command.bytes) {
            warn!(%err, code = key.code, tag = %key.tag, "command write failed");
            self.complete(request, Err(RequestError::Transport(err.to_string())));
            return;
        }

        debug!(
            code = key.code,
            tag = %key.tag,
            attempts = request.attempts,
            "command written"
        );
        if let Err(request) = self.table.insert(request, Instant::now()) {
            let capacity = self.table.capacity();
            error!(capacity, tag = %key.tag, "pending table full");
            self.complete(request, Err(RequestError::QueueFull { capacity }));
        }
    }

    fn read_frames(&mut self) -> Result<()> {
        self.enter(State::ReadingFrame);
        match self.reader.fill() {
            Ok(_) => {}
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }

        loop {
            match self.reader.next_buffered() {
                Ok(Some(frame)) => {
                    if let Err(err) = self.dispatch_frame(frame) {
                        warn!(%err, "discarding response");
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => warn!(%err, "discarding malformed response"),
            }
        }
    }

    /// Hand a response to the oldest pending request with the same key.
    fn dispatch_frame(&mut self, frame: ResponseFrame) -> Result<()> {
        let key = frame.key;
        if frame.is_unknown_command() {
            debug!(tag = %key.tag, "device did not recognize a command");
            return Ok(());
        }

        let matched = match self.desync_policy {
            DesyncPolicy::ResendSkipped => self
                .table
                .take_match(key)
                .map(|matched| (matched.request, matched.skipped)),
            DesyncPolicy::KeepSkipped => self
                .table
                .remove_match(key)
                .map(|request| (request, Vec::new())),
        };
        let Some((request, skipped)) = matched else {
            return Err(LinkError::UnmatchedResponse {
                code: key.code,
                tag: key.tag,
            });
        };

        for mut lost in skipped {
            let tag = lost.key().tag;
            if lost.attempts >= self.max_tries {
                warn!(tag = %tag, retries = lost.attempts, "retries exhausted");
                let retries = lost.attempts;
                self.complete(lost, Err(RequestError::RetryExhausted { retries }));
                continue;
            }
            lost.attempts += 1;
            debug!(
                tag = %tag,
                attempts = lost.attempts,
                "answer skipped an older request, resending it"
            );
            self.resend.push_back(lost);
        }

        trace!(code = key.code, tag = %key.tag, size = frame.payload.len(), "response matched");
        self.complete(request, Ok(frame.payload));
        Ok(())
    }

    /// Resend or fail every entry older than the timeout.
    fn scan_timeouts(&mut self, now: Instant) {
        self.enter(State::ScanningTimeouts);
        while let Some(expired) = self.table.pop_expired(now, self.timeout) {
            let mut request = expired.request;
            let key = request.key();
            if request.attempts < self.max_tries {
                request.attempts += 1;
                debug!(tag = %key.tag, attempts = request.attempts, "response timed out, resending");
                self.resend.push_back(request);
            } else {
                warn!(tag = %key.tag, retries = request.attempts, "retries exhausted");
                let retries = request.attempts;
                self.complete(request, Err(RequestError::RetryExhausted { retries }));
            }
        }
    }

    fn flush_resends(&mut self) {
        while let Some(request) = self.resend.pop_front() {
            self.send_request(request);
        }
    }

    fn complete(&mut self, request: Request, outcome: std::result::Result<Bytes, RequestError>) {
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(request.key().tag);
        request.finish(outcome);
    }

    fn fail_all(&mut self, error: RequestError) {
        let mut doomed: Vec<Request> = self.table.drain().collect();
        doomed.extend(self.resend.drain(..));
        doomed.extend(self.queue.try_iter());
        for request in doomed {
            self.complete(request, Err(error.clone()));
        }
    }

    fn enter(&mut self, next: State) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "reactor state");
            self.state = next;
        }
    }
}
