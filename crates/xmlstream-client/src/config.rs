use std::time::Duration;

use xmlstream_frame::{FrameConfig, DEFAULT_MAX_ELEMENT_SIZE};
use xmlstream_transport::ConnectOptions;

/// How often the liveness watcher probes the socket.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
    /// Reconnect automatically after the peer goes away.
    pub auto_reconnect: bool,
    pub connect_timeout: Option<Duration>,
    pub nodelay: bool,
    /// Largest single element the stream reader will buffer.
    pub max_element_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            auto_reconnect: true,
            connect_timeout: None,
            nodelay: true,
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_max_element_size(mut self, max: usize) -> Self {
        self.max_element_size = max;
        self
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: self.connect_timeout,
            nodelay: self.nodelay,
        }
    }

    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_element_size: self.max_element_size,
        }
    }
}
