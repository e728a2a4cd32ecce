use std::os::unix::net::UnixStream;

use tracing::debug;

use crate::error::Result;
use crate::traits::DeviceStream;

/// Create a connected `(host, device)` stream pair inside this process.
///
/// The host end is handed to a client; tests play the device on the other end.
pub fn loopback_pair() -> Result<(DeviceStream, DeviceStream)> {
    let (host, device) = UnixStream::pair()?;
    debug!("created loopback device pair");
    Ok((DeviceStream::from_unix(host), DeviceStream::from_unix(device)))
}
