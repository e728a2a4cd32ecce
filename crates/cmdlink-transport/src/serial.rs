use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::info;

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Line settings for a serial device.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate. Default: 115200.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}

/// Serial tty transport (e.g. `/dev/rfcomm0`, `/dev/ttyUSB0`).
pub struct SerialPort;

impl SerialPort {
    /// Open a tty read/write in raw mode at the configured baud rate.
    ///
    /// Any failure, including a path that is not a terminal, is reported as
    /// [`TransportError::Open`].
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<DeviceStream> {
        let path = path.as_ref();
        let speed = baud_to_speed(config.baud_rate)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|source| TransportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        configure_raw(&file, speed).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        info!(?path, baud_rate = config.baud_rate, "opened serial device");
        Ok(DeviceStream::from_serial(file))
    }
}

fn baud_to_speed(baud_rate: u32) -> Result<libc::speed_t> {
    let speed = match baud_rate {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaudRate(other)),
    };
    Ok(speed)
}

fn configure_raw(file: &File, speed: libc::speed_t) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: termios is a plain C struct; zeroed is a valid placeholder that
    // tcgetattr overwrites before any field is read.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor owned by `file`, and `tio` is a valid
    // writable termios for every call below.
    unsafe {
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_open_error() {
        let result = SerialPort::open("/nonexistent/cmdlink-tty", &SerialConfig::default());
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }

    #[test]
    fn regular_file_is_not_a_terminal() {
        let path = std::env::temp_dir().join(format!("cmdlink-not-tty-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let result = SerialPort::open(&path, &SerialConfig::default());
        assert!(matches!(result, Err(TransportError::Open { .. })));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_unknown_baud_rate() {
        let config = SerialConfig { baud_rate: 12_345 };
        let result = SerialPort::open("/dev/null", &config);
        assert!(matches!(
            result,
            Err(TransportError::UnsupportedBaudRate(12_345))
        ));
    }
}
