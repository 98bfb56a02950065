//! Client-side notification delivery for the HR portal.
//!
//! A [`NotificationFeed`] keeps the notification list for one session: it
//! loads the list over REST, receives new notifications from a shared
//! [`NotificationHub`] (STOMP over WebSocket), and reconciles read state with
//! the backend.

pub mod api;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod counter;
pub mod error;
pub mod feed;
pub mod hub;
pub mod reconciler;
pub mod session;
pub mod stomp;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{HttpNotificationApi, NotificationApi};
pub use backoff::BackoffPolicy;
pub use channel::{ChannelState, LiveUpdateChannel};
pub use config::ClientConfig;
pub use counter::UnreadCounter;
pub use error::{Error, Result};
pub use feed::NotificationFeed;
pub use hub::{NotificationHub, Subscription};
pub use reconciler::ReadStateReconciler;
pub use session::{Session, TopicScope};
pub use store::NotificationStore;
