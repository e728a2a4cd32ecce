use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Listening side of a device simulator reached over a Unix domain socket.
///
/// A simulator binds a path and accepts the host; the host calls
/// [`DeviceListener::connect`] instead of opening a tty. The socket file is
/// removed on drop.
pub struct DeviceListener {
    listener: UnixListener,
    path: PathBuf,
}

impl DeviceListener {
    /// Maximum socket path length (`sockaddr_un.sun_path`).
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a simulator socket, replacing a stale socket file at `path`.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale simulator socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        info!(?path, "device simulator listening");
        Ok(Self { listener, path })
    }

    /// Accept the host connection (blocking). Returns the device end.
    pub fn accept(&self) -> Result<DeviceStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("simulator accepted host");
        Ok(DeviceStream::from_unix(stream))
    }

    /// Connect the host to a listening simulator (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<DeviceStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to device simulator");
        Ok(DeviceStream::from_unix(stream))
    }

    /// The path this simulator is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeviceListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cmdlink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn host_reaches_simulator() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("device.sock");
        let listener = DeviceListener::bind(&sock_path).unwrap();

        let path_clone = sock_path.clone();
        let host = std::thread::spawn(move || {
            let mut stream = DeviceListener::connect(&path_clone).unwrap();
            stream.write_all(b"Ba,1\n").unwrap();
        });

        let mut device = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Ba,1\n");
        host.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_simulator_fails() {
        let result = DeviceListener::connect("/tmp/cmdlink-no-such-simulator.sock");
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"d".repeat(200) + ".sock";
        let result = DeviceListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let dir = temp_dir("uds-file");
        let sock_path = dir.join("plain.sock");
        std::fs::write(&sock_path, b"not a socket").unwrap();

        let result = DeviceListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
