//! Provider discovery broadcasts.
//!
//! Pages using multi-wallet discovery enumerate installed providers by
//! listening for announcement events instead of probing global variable
//! names. The bridge announces itself on load, again after a short delay
//! (late-registering listeners), and whenever a discovery request is
//! observed.

use tokio::sync::broadcast;

use keybridge_messages::{DiscoveryAnnouncement, ProviderMetadata};

/// Stable identity for this provider build.
pub const PROVIDER_UUID: &str = "9a1b43f8-55c7-4f32-9c80-5dd9f4a12b6e";
pub const PROVIDER_NAME: &str = "KeyBridge";
pub const PROVIDER_RDNS: &str = "com.keybridge.wallet";
/// 1×1 placeholder; real builds bake the product icon in at packaging time.
pub const PROVIDER_ICON: &str =
    "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Default announced identity.
pub fn default_metadata() -> ProviderMetadata {
    ProviderMetadata {
        uuid: PROVIDER_UUID.to_string(),
        name: PROVIDER_NAME.to_string(),
        icon: PROVIDER_ICON.to_string(),
        rdns: PROVIDER_RDNS.to_string(),
    }
}

/// Fan-out channel for discovery announcements.
pub struct Announcer {
    metadata: ProviderMetadata,
    tx: broadcast::Sender<DiscoveryAnnouncement>,
}

impl Announcer {
    pub fn new(metadata: ProviderMetadata) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { metadata, tx }
    }

    /// Subscribe to subsequent announcements.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryAnnouncement> {
        self.tx.subscribe()
    }

    /// Broadcast the provider identity.
    pub fn announce(&self) {
        let _ = self.tx.send(DiscoveryAnnouncement {
            info: self.metadata.clone(),
        });
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announce_reaches_subscribers() {
        let announcer = Announcer::new(default_metadata());
        let mut rx = announcer.subscribe();
        announcer.announce();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.info.rdns, PROVIDER_RDNS);
        assert_eq!(got.info.uuid, PROVIDER_UUID);
    }
}
