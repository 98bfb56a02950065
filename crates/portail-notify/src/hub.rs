use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use portail_types::LiveEvent;

use crate::channel::{ChannelConfig, ChannelState, LiveUpdateChannel};

/// Per-topic fan-out buffer.
const TOPIC_BUFFER: usize = 256;

/// Shares one live connection between every consumer in the process.
///
/// Topics are reference counted: the first [`Subscription`] for a topic
/// subscribes on the broker, dropping the last one unsubscribes, and once no
/// topic is left the connection is shut down. The connection is opened lazily
/// on the first subscribe.
///
/// Each connection gets a new generation number. Guards remember the
/// generation they were issued under, so a guard that outlives its connection
/// (after `shutdown`, or after the channel gave up reconnecting) never touches
/// the refcounts of a later one.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: ChannelConfig,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    channel: Option<LiveUpdateChannel>,
    generation: u64,
    topics: HashMap<String, TopicEntry>,
}

struct TopicEntry {
    refs: usize,
    tx: broadcast::Sender<LiveEvent>,
}

impl HubState {
    /// Forget the current connection and every topic sender, so receivers
    /// issued under it see the end of their stream.
    fn retire(&mut self) -> Option<LiveUpdateChannel> {
        self.topics.clear();
        self.channel.take()
    }
}

impl NotificationHub {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.channel.as_ref().is_some_and(LiveUpdateChannel::is_closed) {
            warn!("Notification channel had stopped, opening a new one");
            state.retire();
        }

        if state.channel.is_none() {
            info!("Opening notification channel to {}", self.inner.config.url);
            let channel = LiveUpdateChannel::spawn(self.inner.config.clone());
            state.generation += 1;
            watch_for_close(Arc::downgrade(&self.inner), state.generation, channel.state());
            state.channel = Some(channel);
        }

        let rx = match state.topics.get_mut(topic) {
            Some(entry) => {
                entry.refs += 1;
                entry.tx.subscribe()
            }
            None => {
                let (tx, rx) = broadcast::channel(TOPIC_BUFFER);
                if let Some(channel) = &state.channel {
                    channel.subscribe(topic, tx.clone());
                }
                state.topics.insert(topic.to_string(), TopicEntry { refs: 1, tx });
                rx
            }
        };

        Subscription {
            hub: self.clone(),
            topic: topic.to_string(),
            generation: state.generation,
            rx,
        }
    }

    fn release(&self, topic: &str, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.generation != generation || state.channel.is_none() {
            return;
        }

        let Some(entry) = state.topics.get_mut(topic) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }
        state.topics.remove(topic);
        if let Some(channel) = &state.channel {
            channel.unsubscribe(topic);
        }

        if state.topics.is_empty() {
            if let Some(channel) = state.channel.take() {
                info!("Last notification subscription dropped, closing channel");
                channel.shutdown();
            }
        }
    }

    pub fn topic_count(&self) -> usize {
        self.inner.state.lock().topics.len()
    }

    pub fn ref_count(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.refs)
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .channel
            .as_ref()
            .is_some_and(|c| *c.state().borrow() == ChannelState::Connected)
    }

    /// Connection state, if a connection is open.
    pub fn channel_state(&self) -> Option<watch::Receiver<ChannelState>> {
        self.inner.state.lock().channel.as_ref().map(LiveUpdateChannel::state)
    }

    /// Close the connection now. Outstanding subscriptions stop receiving
    /// events; a later `subscribe` opens a fresh connection.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if let Some(channel) = state.retire() {
            channel.shutdown();
        }
    }
}

/// Retire generation `generation` once its channel task stops on its own
/// (reconnect budget spent), ending every subscription issued under it.
fn watch_for_close(hub: Weak<HubInner>, generation: u64, mut state_rx: watch::Receiver<ChannelState>) {
    tokio::spawn(async move {
        while *state_rx.borrow_and_update() != ChannelState::Closed {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        let Some(inner) = hub.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if state.generation == generation && state.channel.is_some() {
            warn!("Notification channel stopped reconnecting, ending its subscriptions");
            state.retire();
        }
    });
}

/// Receives live events for one topic. Dropping it releases the topic.
pub struct Subscription {
    hub: NotificationHub,
    topic: String,
    generation: u64,
    rx: broadcast::Receiver<LiveEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event, or `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscriber on {} lagged by {} events", self.topic, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(&self.topic, self.generation);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("generation", &self.generation)
            .finish()
    }
}
