//! Request/response management for half-duplex command devices.
//!
//! The [`Dispatcher`] owns the device stream on a dedicated thread. Callers
//! submit commands from any thread and get a [`Handle`] back; the dispatcher
//! writes commands in submission order, pairs each response with the oldest
//! matching request, and resends or fails requests the device never answered.
//!
//! [`SyncClient`] speaks the same protocol without a thread or retries.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod pending;
pub mod sync_client;
pub mod wakeup;

pub use config::{DesyncPolicy, DispatcherConfig, SyncConfig};
pub use dispatcher::Dispatcher;
pub use error::{LinkError, RequestError, Result};
pub use handle::Handle;
pub use pending::PendingSnapshot;
pub use sync_client::SyncClient;
pub use wakeup::Signal;
