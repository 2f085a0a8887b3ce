//! Alert state store
//!
//! Holds the connectivity flag and the single most recent alert of a
//! session. A new alert replaces the previous one; there is no queue.

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    channel::ChannelEvent,
    models::{ParentId, ScanAlert},
};

/// Observable state of one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    pub connected: bool,
    pub last_alert: Option<ScanAlert>,
}

/// Single-writer store with watch-based observers
#[derive(Debug)]
pub struct AlertStore {
    parent_id: Option<ParentId>,
    state: watch::Sender<AlertState>,
}

impl AlertStore {
    /// Create an empty store
    ///
    /// When the session's parent identity is known, alerts routed to
    /// another parent are dropped.
    pub fn new(parent_id: Option<ParentId>) -> Self {
        let (state, _) = watch::channel(AlertState::default());
        Self { parent_id, state }
    }

    /// Apply a channel event
    pub fn apply(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.set_connected(true),
            ChannelEvent::Disconnected => self.set_connected(false),
            ChannelEvent::Scan(alert) => {
                if let Some(parent_id) = &self.parent_id {
                    if &alert.parent_id != parent_id {
                        warn!(
                            "Dropping alert for parent {} in session of {}",
                            alert.parent_id, parent_id
                        );
                        return;
                    }
                }
                debug!("New alert for child {}", alert.child_id);
                self.state.send_modify(|state| state.last_alert = Some(alert));
            }
        }
    }

    /// Dismiss the current alert; local only
    pub fn clear(&self) {
        self.state.send_if_modified(|state| state.last_alert.take().is_some());
    }

    pub fn snapshot(&self) -> AlertState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AlertState> {
        self.state.subscribe()
    }

    fn set_connected(&self, connected: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        });
    }
}
