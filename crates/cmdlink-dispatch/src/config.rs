use std::time::Duration;

use bytes::Bytes;
use cmdlink_frame::{DEFAULT_MAX_LINE, TAG_ALPHABET};

/// What to do with older requests skipped over when a newer one is answered.
///
/// The device runs commands in order, so an answer to a newer request means
/// the older ones were lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesyncPolicy {
    /// Resend every skipped request immediately.
    #[default]
    ResendSkipped,
    /// Leave skipped requests pending; they are resent when they time out.
    KeepSkipped,
}

/// Configuration for [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name used for the thread and the `device` span field.
    pub label: String,
    /// How long a request may wait for its response before it is resent.
    /// Also bounds each readiness wait. Default: 500 ms.
    pub timeout: Duration,
    /// Resends allowed before a request fails. Default: 10.
    pub max_tries: u32,
    /// Maximum requests queued or pending at once. Clamped to the tag
    /// alphabet size. Default: 52.
    pub max_in_flight: usize,
    /// Maximum text response line length. Default: 64 KiB.
    pub max_line_len: usize,
    /// Handling of requests skipped by an out-of-order response.
    pub desync_policy: DesyncPolicy,
    /// Bytes written once when the dispatcher starts. Default: `\r`.
    pub wake_sequence: Option<Bytes>,
    /// Parent span for this dispatcher's log events.
    pub span: tracing::Span,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            label: "device".to_string(),
            timeout: Duration::from_millis(500),
            max_tries: 10,
            max_in_flight: TAG_ALPHABET.len(),
            max_line_len: DEFAULT_MAX_LINE,
            desync_policy: DesyncPolicy::default(),
            wake_sequence: Some(Bytes::from_static(b"\r")),
            span: tracing::Span::none(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.desync_policy = policy;
        self
    }

    pub fn with_wake_sequence(mut self, wake_sequence: Option<Bytes>) -> Self {
        self.wake_sequence = wake_sequence;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Effective in-flight bound after clamping.
    pub(crate) fn in_flight_capacity(&self) -> usize {
        self.max_in_flight.clamp(1, TAG_ALPHABET.len())
    }
}

/// Configuration for [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Read timeout applied to a [`DeviceStream`](cmdlink_transport::DeviceStream)
    /// by [`SyncClient::open`](crate::SyncClient::open). Default: 500 ms.
    pub read_timeout: Duration,
    /// Maximum text response line length. Default: 64 KiB.
    pub max_line_len: usize,
    /// Bytes written once on connect. Default: `\r`.
    pub wake_sequence: Option<Bytes>,
    /// Discard one line (the device banner) after the wake sequence.
    pub skip_banner: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            max_line_len: DEFAULT_MAX_LINE,
            wake_sequence: Some(Bytes::from_static(b"\r")),
            skip_banner: true,
        }
    }
}

impl SyncConfig {
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Connect silently: no wake sequence and no banner.
    pub fn without_wake(mut self) -> Self {
        self.wake_sequence = None;
        self.skip_banner = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_conventions() {
        let config = DispatcherConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.max_tries, 10);
        assert_eq!(config.in_flight_capacity(), 52);
        assert_eq!(config.desync_policy, DesyncPolicy::ResendSkipped);
    }

    #[test]
    fn in_flight_is_clamped_to_alphabet() {
        let config = DispatcherConfig::default().with_max_in_flight(500);
        assert_eq!(config.in_flight_capacity(), TAG_ALPHABET.len());
        assert_eq!(DispatcherConfig::default().with_max_in_flight(0).in_flight_capacity(), 1);
    }
}
