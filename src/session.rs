//! Session-scoped alert pipeline
//!
//! A session owns the alert channel, the store, and the task pumping one
//! into the other. It lives from successful authentication to logout; a
//! token change means ending the session and starting a new one, which
//! also starts from an empty store.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    channel::ChannelBuilder,
    config::ChannelConfig,
    errors::ScanAlertError,
    models::{ParentId, ScanAlert},
    store::{AlertState, AlertStore},
};

pub struct Session {
    store: Arc<AlertStore>,
    pump: JoinHandle<()>,
}

impl Session {
    /// Connect the alert channel with the session token
    pub fn start(
        config: &ChannelConfig,
        token: &str,
        parent_id: Option<ParentId>,
    ) -> Result<Self, ScanAlertError> {
        let mut channel = ChannelBuilder::new(config, token)?.connect();
        let store = Arc::new(AlertStore::new(parent_id));

        let pump_store = Arc::clone(&store);
        let pump = tokio::spawn(async move {
            while let Some(event) = channel.recv().await {
                pump_store.apply(event);
            }
            info!("Alert channel stopped");
        });

        Ok(Self { store, pump })
    }

    pub fn connected(&self) -> bool {
        self.store.snapshot().connected
    }

    pub fn latest_alert(&self) -> Option<ScanAlert> {
        self.store.snapshot().last_alert
    }

    /// Dismiss the latest alert
    pub fn acknowledge(&self) {
        self.store.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<AlertState> {
        self.store.subscribe()
    }

    /// Tear down the channel; observers see the store close
    pub fn end(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Aborting the pump drops the channel client, which aborts the connection
        self.pump.abort();
    }
}
