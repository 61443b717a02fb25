//! Event system for share pipeline notifications
//!
//! An in-process event bus that lets the web layer, the worker daemon or
//! tests observe provider changes, queued and finished publishes and pull
//! runs without the emitting service knowing about them.
//!
//! The bus uses `tokio::sync::broadcast`: emitting never blocks, events are
//! dropped when nobody listens, and lagging subscribers lose the oldest
//! events first.
//!
//! # Example
//!
//! ```no_run
//! use libsharecast::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::ShareQueued {
//!     share_id: 7,
//!     job_id: 1,
//!     description: "Posting to Acme".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers; never blocks
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted by the services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A provider configuration was added or updated
    ProviderSaved { uid: String, handle: String, is_new: bool },

    ProviderDeleted { uid: String, handle: String },

    /// A publish job was enqueued for a share
    ShareQueued {
        share_id: i64,
        job_id: i64,
        description: String,
    },

    SharePublished {
        share_id: i64,
        post_url: Option<String>,
    },

    /// The single publish attempt failed; the share is now terminal
    ShareFailed { share_id: i64, error: String },

    /// Posts of one account were imported
    PostsPulled { account_id: i64, count: usize },
}
