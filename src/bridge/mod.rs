//! Bridge module
//!
//! The method-name dispatch surface of the crate: wire types, the
//! subscription registry, and one dispatcher per façade, tied together by
//! a shared teardown token. The embedding shell hands each incoming call
//! to the matching dispatcher and drains the delivery channel.

pub mod auth;
pub mod database;
pub mod message;
pub mod registry;

// Re-export the dispatchers
pub use auth::AuthBridge;
pub use database::DatabaseBridge;

// Re-export the wire types
pub use message::{
    response_channel, response_stream, BridgeRequest, BridgeResponse, BridgeStatus, Responder,
    ResponseReceiver, ResponseSender,
};

// Re-export the registry types
pub use registry::{ListenerHandle, SubscriptionRegistry};

use crate::auth::Auth;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Both dispatchers plus the teardown machinery of one caller context
///
/// All deliveries funnel into the single channel handed to [`Bridge::new`];
/// [`Bridge::teardown`] guarantees that nothing is delivered afterwards —
/// in-flight backend events detach instead.
pub struct Bridge {
    auth: AuthBridge,
    database: DatabaseBridge,
    teardown: CancellationToken,
}

impl Bridge {
    /// Build a bridge delivering into `tx`
    pub fn new(auth: Auth, tx: ResponseSender) -> Self {
        let teardown = CancellationToken::new();
        Self {
            auth: AuthBridge::new(auth, tx.clone(), teardown.clone()),
            database: DatabaseBridge::new(tx, teardown.clone()),
            teardown,
        }
    }

    /// The auth dispatcher
    pub fn auth(&self) -> &AuthBridge {
        &self.auth
    }

    /// The database dispatcher
    pub fn database(&self) -> &DatabaseBridge {
        &self.database
    }

    /// Tear the context down: no callback fires after this returns
    pub async fn teardown(&self) {
        debug!("bridge teardown");
        self.teardown.cancel();
        self.auth.teardown().await;
        self.database.teardown().await;
    }

    /// Whether the context was torn down
    pub fn is_torn_down(&self) -> bool {
        self.teardown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_observable() {
        let auth = Auth::get_auth("bridge_root_key_1").await.unwrap();
        let (tx, _rx) = response_channel();
        let bridge = Bridge::new(auth, tx);

        assert!(!bridge.is_torn_down());
        bridge.teardown().await;
        assert!(bridge.is_torn_down());
        bridge.teardown().await;
        assert!(bridge.is_torn_down());
    }
}
