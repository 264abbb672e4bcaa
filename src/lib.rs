//! Firebase hybrid-app bridge
//!
//! Native-side bridge exposing Firebase Authentication and the Realtime
//! Database to a hybrid-app JavaScript layer: method names plus JSON
//! arguments in, JSON results asynchronously out on a single delivery
//! channel.
//!
//! # Example (dispatching a sign-in request)
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use firebase_bridge::{Auth, Bridge, BridgeRequest, response_channel};
//!
//! let auth = Auth::get_auth("YOUR_API_KEY").await?;
//! let (tx, mut rx) = response_channel();
//! let bridge = Bridge::new(auth, tx);
//!
//! bridge.auth().dispatch(BridgeRequest::new(
//!     "req-1",
//!     "signInAnonymously",
//!     vec![],
//! ));
//!
//! let response = rx.recv().await.expect("delivery channel closed");
//! println!("signed in: {}", response.payload["uid"]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;

// Auth module
pub mod auth {
    //! Firebase Authentication

    pub mod auth;
    pub mod types;

    pub use auth::Auth;
    pub use types::{AuthResult, Credential, PhoneVerification, User, UserProfile};
}

// Realtime Database module
pub mod database;

// Bridge dispatch module
pub mod bridge;

// Re-exports for convenience
pub use error::{AuthError, BridgeError, DatabaseError};

// Auth re-exports
pub use auth::{Auth, AuthResult, Credential, PhoneVerification, User, UserProfile};

// Database re-exports
pub use database::{DataSnapshot, Database, EventKind, QuerySpec, Reference};

// Bridge re-exports
pub use bridge::{response_channel, Bridge, BridgeRequest, BridgeResponse, BridgeStatus};
