//! ORTC Client Library
//!
//! Async client for the ORTC realtime publish/subscribe protocol.
//!
//! # Example
//!
//! ```ignore
//! use ortc_client::{ClientEvent, OrtcClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrtcClient::builder()
//!         .cluster_url("https://ortc-developers.realtime.co/server/2.1")
//!         .build()?;
//!
//!     client.on_event(|event| {
//!         if let ClientEvent::Exception(e) = event {
//!             eprintln!("ortc: {}", e);
//!         }
//!     });
//!
//!     client
//!         .connect_and_wait("appKey", "authToken", Duration::from_secs(15))
//!         .await?;
//!
//!     client.subscribe("chat:lobby", |channel, message| {
//!         println!("{}: {}", channel, message);
//!     })?;
//!
//!     client.send("chat:lobby", "hello")?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod rest;
mod timer;

pub use builder::OrtcBuilder;
pub use client::{ConnectionState, OrtcClient};
pub use cluster::ClusterResolver;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus, HandlerId};
pub use registry::{ChannelSubscription, MessageHandler, SubscriptionRegistry};
pub use rest::{MessageClient, RestMessage};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::OrtcBuilder;
    pub use crate::client::{ConnectionState, OrtcClient};
    pub use crate::config::ClientConfig;
    pub use crate::error::{ClientError, Result};
    pub use crate::events::ClientEvent;
}
