//! Link configuration.

use crate::LINK_SERVICE;
use tether_transport::ServiceId;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service id identifying the link service on the transport.
    ///
    /// Both peers must use the same id.
    pub service: ServiceId,

    /// Size of the session read buffer; each completed read delivers at most
    /// this many bytes as one inbound payload.
    pub read_buffer_size: usize,

    /// Capacity of the event channel handed out at construction.
    ///
    /// Inbound payloads are delivered with backpressure (a full channel
    /// pauses the session's read loop); control events are dropped with a
    /// warning when the consumer lags.
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service: LINK_SERVICE,
            read_buffer_size: 1024,
            event_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.service, LINK_SERVICE);
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.event_capacity > 0);
    }
}
