//! Scan window that collects advertising sensor nodes.

use crate::radio::{Central, DiscoveredNodes, DiscoveryInbox};

/// Active scan for sensor nodes, collecting into a [`DiscoveryInbox`].
pub struct WirelessDiscovery<'a> {
    inbox: &'a DiscoveryInbox,
}

impl<'a> WirelessDiscovery<'a> {
    pub const fn new(inbox: &'a DiscoveryInbox) -> Self {
        Self { inbox }
    }

    /// Scan for `window_secs` and return what was found.
    ///
    /// A scan failure is not an error for the cycle; whatever was delivered
    /// before it is still returned.
    pub async fn start_scan<C: Central>(&self, central: &mut C, window_secs: u32) -> DiscoveredNodes {
        self.inbox.clear();
        log::info!("[SCAN] scanning for {}s", window_secs);

        if let Err(e) = central.scan(window_secs, self.inbox).await {
            log::warn!("[SCAN] scan aborted: {}", e);
        }

        let found = self.inbox.take();
        log::info!("[SCAN] {} node(s) found", found.len());
        found
    }

    /// Release scan resources once the discovered set has been ingested.
    pub async fn stop_and_clear<C: Central>(&self, central: &mut C) {
        central.stop_scan().await;
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::uuids::SENSOR_SERVICE;
    use crate::testing::{FakeNode, FakeRadio};
    use embassy_futures::block_on;

    #[test]
    fn test_scan_returns_advertising_nodes() {
        let inbox = DiscoveryInbox::new(SENSOR_SERVICE);
        let discovery = WirelessDiscovery::new(&inbox);
        let mut radio = FakeRadio::new([FakeNode::healthy(1), FakeNode::healthy(2)]);

        let found = block_on(discovery.start_scan(&mut radio, 10));

        assert_eq!(found.len(), 2);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_stop_and_clear_empties_inbox() {
        let inbox = DiscoveryInbox::new(SENSOR_SERVICE);
        let discovery = WirelessDiscovery::new(&inbox);
        let mut radio = FakeRadio::new([FakeNode::healthy(1), FakeNode::healthy(2)]);
        block_on(discovery.start_scan(&mut radio, 10));

        // Late advertisements land after the window closed.
        block_on(radio.scan(10, &inbox)).unwrap();
        assert_eq!(inbox.len(), 2);

        block_on(discovery.stop_and_clear(&mut radio));

        assert!(inbox.is_empty());
        assert_eq!(radio.events, ["scan", "scan", "stop_scan"]);
    }
}
