//! Self-signalling channel that interrupts the dispatcher's readiness wait.
//!
//! Producers append one line per signal to a socket pair; the dispatcher
//! polls the read end alongside the device and drains every buffered line
//! in one pass, so several signals may arrive with a single wakeup.

use std::io::{self, ErrorKind, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, BytesMut};
use tracing::warn;

/// A signal posted to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// One command was queued.
    New,
    /// Shut down after the current iteration.
    Stop,
}

impl Signal {
    fn line(self) -> &'static [u8] {
        match self {
            Signal::New => b"NEW\n",
            Signal::Stop => b"STOP\n",
        }
    }

    fn parse(line: &[u8]) -> Option<Self> {
        match line {
            b"NEW" => Some(Signal::New),
            b"STOP" => Some(Signal::Stop),
            _ => None,
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SEND_FLAGS: libc::c_int = 0;

/// Producer end. Cloneable; each signal is written as one whole line.
///
/// A receiver that has gone away yields `BrokenPipe` instead of raising
/// `SIGPIPE` in the host process.
#[derive(Clone)]
pub struct WakeupSender {
    stream: Arc<Mutex<UnixStream>>,
}

impl WakeupSender {
    pub fn notify(&self, signal: Signal) -> io::Result<()> {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let mut line = signal.line();
        while !line.is_empty() {
            // SAFETY: `line` is a live buffer of `line.len()` bytes and the
            // descriptor is owned by `stream`, which the guard keeps alive.
            let sent = unsafe {
                libc::send(
                    stream.as_raw_fd(),
                    line.as_ptr().cast(),
                    line.len(),
                    SEND_FLAGS,
                )
            };
            if sent < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            line = &line[sent as usize..];
        }
        Ok(())
    }
}

/// Platforms without `MSG_NOSIGNAL` suppress `SIGPIPE` per socket.
#[cfg(target_vendor = "apple")]
fn suppress_sigpipe(stream: &UnixStream) -> io::Result<()> {
    let on: libc::c_int = 1;
    // SAFETY: `on` outlives the call and its size is passed alongside it.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            (&on as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Consumer end, owned by the dispatcher thread.
pub struct WakeupReceiver {
    stream: UnixStream,
    partial: BytesMut,
}

impl WakeupReceiver {
    /// Read everything buffered and return the signals in the order written.
    ///
    /// Never blocks. When every sender is gone a trailing `Stop` is reported.
    pub fn drain(&mut self) -> io::Result<Vec<Signal>> {
        let mut closed = false;
        let mut chunk = [0u8; 256];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.partial.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }

        let mut signals = Vec::new();
        while let Some(newline) = self.partial.iter().position(|&b| b == b'\n') {
            let line = self.partial.split_to(newline);
            self.partial.advance(1);
            match Signal::parse(&line) {
                Some(signal) => signals.push(signal),
                None => warn!(line = %String::from_utf8_lossy(&line), "ignoring unknown wakeup signal"),
            }
        }
        if closed {
            signals.push(Signal::Stop);
        }
        Ok(signals)
    }
}

impl AsFd for WakeupReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> io::Result<(WakeupSender, WakeupReceiver)> {
    let (write_end, read_end) = UnixStream::pair()?;
    read_end.set_nonblocking(true)?;
    #[cfg(target_vendor = "apple")]
    suppress_sigpipe(&write_end)?;
    Ok((
        WakeupSender {
            stream: Arc::new(Mutex::new(write_end)),
        },
        WakeupReceiver {
            stream: read_end,
            partial: BytesMut::new(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;
    use std::time::{Duration, Instant};

    use cmdlink_transport::wait_readable;

    use super::*;

    #[test]
    fn coalesced_signals_drain_in_order() {
        let (tx, mut rx) = channel().unwrap();
        tx.notify(Signal::New).unwrap();
        tx.notify(Signal::New).unwrap();
        tx.notify(Signal::Stop).unwrap();
        tx.notify(Signal::New).unwrap();

        assert_eq!(
            rx.drain().unwrap(),
            vec![Signal::New, Signal::New, Signal::Stop, Signal::New]
        );
        assert!(rx.drain().unwrap().is_empty());
    }

    #[test]
    fn drain_never_blocks() {
        let (_tx, mut rx) = channel().unwrap();
        assert!(rx.drain().unwrap().is_empty());
    }

    #[test]
    fn wakes_a_readiness_wait() {
        let (tx, rx) = channel().unwrap();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.notify(Signal::New).unwrap();
        });

        let ready = wait_readable(&[rx.as_fd()], Some(Duration::from_secs(2))).unwrap();
        assert_eq!(ready, vec![true]);
        producer.join().unwrap();
    }

    #[test]
    fn concurrent_producers_never_interleave_lines() {
        let (tx, mut rx) = channel().unwrap();
        let producers: Vec<_> = (0..8)
            .map(|_| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        tx.notify(Signal::New).unwrap();
                    }
                })
            })
            .collect();
        drop(tx);

        // Drain while producing; the socket buffer holds far fewer lines.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut signals = Vec::new();
        while signals.last() != Some(&Signal::Stop) && Instant::now() < deadline {
            wait_readable(&[rx.as_fd()], Some(Duration::from_millis(100))).unwrap();
            signals.extend(rx.drain().unwrap());
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(signals.pop(), Some(Signal::Stop), "every sender dropped");
        assert_eq!(signals.len(), 400);
        assert!(signals.iter().all(|&s| s == Signal::New));
    }

    #[test]
    fn notify_after_receiver_drop_is_broken_pipe() {
        let (tx, rx) = channel().unwrap();
        drop(rx);

        let err = tx.notify(Signal::New).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn dropped_senders_read_as_stop() {
        let (tx, mut rx) = channel().unwrap();
        tx.notify(Signal::New).unwrap();
        drop(tx);

        assert_eq!(rx.drain().unwrap(), vec![Signal::New, Signal::Stop]);
    }

    #[test]
    fn unknown_lines_are_skipped() {
        let (tx, mut rx) = channel().unwrap();
        tx.stream.lock().unwrap().write_all(b"HELLO\nNEW\n").unwrap();
        assert_eq!(rx.drain().unwrap(), vec![Signal::New]);
    }
}
