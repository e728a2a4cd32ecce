//! Multi-source readiness wait built on `poll(2)`.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

/// Block until at least one source is readable or `timeout` elapses.
///
/// Returns one flag per source, in the order given. Every flag is `false`
/// when the wait timed out. Hang-up and error conditions count as readable
/// so the caller sees them on its next read. `None` waits without a bound.
pub fn wait_readable(
    sources: &[BorrowedFd<'_>],
    timeout: Option<Duration>,
) -> io::Result<Vec<bool>> {
    let mut fds: Vec<libc::pollfd> = sources
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        let wait_ms = match deadline {
            Some(deadline) => timeout_millis(deadline.saturating_duration_since(Instant::now())),
            None => -1,
        };

        // SAFETY: `fds` is an exclusively borrowed array of `fds.len()` pollfd
        // entries, and every descriptor stays open for the lifetime of `sources`.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, wait_ms) };
        if rc >= 0 {
            return Ok(fds.iter().map(|fd| fd.revents != 0).collect());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Round up to whole milliseconds so sub-millisecond waits do not spin.
fn timeout_millis(remaining: Duration) -> libc::c_int {
    let millis = remaining.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn times_out_when_nothing_is_readable() {
        let (left, _right) = UnixStream::pair().unwrap();
        let start = Instant::now();
        let ready = wait_readable(&[left.as_fd()], Some(Duration::from_millis(30))).unwrap();

        assert_eq!(ready, vec![false]);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn reports_only_the_ready_source() {
        let (a_left, mut a_right) = UnixStream::pair().unwrap();
        let (b_left, _b_right) = UnixStream::pair().unwrap();
        a_right.write_all(b"x").unwrap();

        let ready = wait_readable(
            &[b_left.as_fd(), a_left.as_fd()],
            Some(Duration::from_secs(1)),
        )
        .unwrap();
        assert_eq!(ready, vec![false, true]);
    }

    #[test]
    fn hang_up_counts_as_readable() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);

        let ready = wait_readable(&[left.as_fd()], Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, vec![true]);
    }

    #[test]
    fn millisecond_rounding() {
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_micros(10)), 1);
        assert_eq!(timeout_millis(Duration::from_micros(1500)), 2);
        assert_eq!(timeout_millis(Duration::from_secs(2)), 2000);
    }
}
