//! History view reconciliation
//!
//! The push channel only invalidates the history; the list shown is always
//! a page fetched from the server. Two guards keep the view consistent:
//! a refetch happens at most once per distinct alert, and a fetch issued
//! for another child (or before a child switch) is discarded on arrival.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    api::{HistoryQuery, HistorySource},
    errors::ScanAlertError,
    map::MapTrace,
    models::{ChildId, HistoryPage, RecordId, ScanAlert, ScanRecord},
    presentation::HistoryRow,
    store::AlertState,
};

/// Identity of an in-flight history fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    child_id: ChildId,
    generation: u64,
}

impl FetchTicket {
    pub fn child_id(&self) -> &ChildId {
        &self.child_id
    }
}

/// Scan history of the currently viewed child
#[derive(Debug, Clone)]
pub struct HistoryView {
    child_id: ChildId,
    limit: u32,
    records: Vec<ScanRecord>,
    total: u64,
    last_reconciled: Option<RecordId>,
    generation: u64,
}

impl HistoryView {
    pub fn new(child_id: ChildId, limit: u32) -> Self {
        Self {
            child_id,
            limit,
            records: Vec::new(),
            total: 0,
            last_reconciled: None,
            generation: 0,
        }
    }

    pub fn child_id(&self) -> &ChildId {
        &self.child_id
    }

    /// Loaded records, newest first as served
    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn query(&self) -> HistoryQuery {
        HistoryQuery::latest(self.limit)
    }

    /// Decide whether an alert invalidates this view
    ///
    /// True only for alerts about the viewed child whose record differs from
    /// the last one reconciled; the record is remembered either way.
    pub fn should_refetch(&mut self, alert: &ScanAlert) -> bool {
        if alert.child_id != self.child_id {
            return false;
        }
        if self.last_reconciled.as_ref() == Some(&alert.log.id) {
            return false;
        }
        self.last_reconciled = Some(alert.log.id.clone());
        true
    }

    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            child_id: self.child_id.clone(),
            generation: self.generation,
        }
    }

    /// Apply a fetched page unless it is stale; returns whether it was used
    pub fn apply(&mut self, ticket: &FetchTicket, page: HistoryPage) -> bool {
        if ticket.child_id != self.child_id || ticket.generation != self.generation {
            debug!(
                "Discarding stale history for child {} (viewing {})",
                ticket.child_id, self.child_id
            );
            return false;
        }
        self.records = page.logs;
        self.total = page.total;
        true
    }

    /// Start viewing another child; in-flight fetches become stale
    pub fn switch_child(&mut self, child_id: ChildId) {
        self.child_id = child_id;
        self.generation += 1;
        self.records.clear();
        self.total = 0;
        self.last_reconciled = None;
    }

    pub fn rows(&self) -> Vec<HistoryRow> {
        self.records.iter().map(HistoryRow::from_record).collect()
    }

    pub fn map_trace(&self) -> MapTrace {
        MapTrace::from_records(&self.records)
    }

    /// Paging note shown under the table
    pub fn footer(&self) -> Option<String> {
        let shown = self.records.len() as u64;
        if self.total > shown {
            Some(format!(
                "Showing latest {} of {} scans.",
                shown, self.total
            ))
        } else {
            None
        }
    }

    /// Fetch the current page and apply it
    pub async fn refresh<H: HistorySource>(
        &mut self,
        source: &H,
        token: &str,
    ) -> Result<bool, ScanAlertError> {
        let ticket = self.begin_fetch();
        let page = source.history(token, &ticket.child_id, self.query()).await?;
        Ok(self.apply(&ticket, page))
    }
}

/// Keep a history view reconciled with incoming alerts
///
/// Loads the view, then refetches once for every new alert about the viewed
/// child until the store goes away. `on_update` runs after every applied
/// page. A rejected token ends the loop.
pub async fn follow_history<H, F>(
    source: &H,
    token: &str,
    view: &mut HistoryView,
    alerts: watch::Receiver<AlertState>,
    on_update: F,
) -> Result<(), ScanAlertError>
where
    H: HistorySource,
    F: FnMut(&HistoryView),
{
    // Held open so the switch input never fires
    let (_no_switches, switches) = mpsc::channel(1);
    follow_history_switching(source, token, view, alerts, switches, on_update).await
}

/// Like [`follow_history`], also following the viewer to other children
///
/// A child received on `switches` while a fetch is in flight makes that
/// fetch stale: its page is discarded on arrival and the new child is
/// loaded next.
pub async fn follow_history_switching<H, F>(
    source: &H,
    token: &str,
    view: &mut HistoryView,
    mut alerts: watch::Receiver<AlertState>,
    mut switches: mpsc::Receiver<ChildId>,
    mut on_update: F,
) -> Result<(), ScanAlertError>
where
    H: HistorySource,
    F: FnMut(&HistoryView),
{
    // The initial load already covers an alert present at open time
    mark_present_alert(view, &mut alerts);

    let mut initial = true;
    let mut pending = true;
    let mut switches_open = true;

    loop {
        while pending {
            pending = false;
            let ticket = view.begin_fetch();
            let fetch = source.history(token, ticket.child_id(), view.query());
            tokio::pin!(fetch);

            let result = loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    child = switches.recv(), if switches_open => match child {
                        Some(child) => {
                            info!("Switching history from child {} to {}", view.child_id, child);
                            view.switch_child(child);
                            mark_present_alert(view, &mut alerts);
                            pending = true;
                        }
                        None => switches_open = false,
                    },
                }
            };

            match result {
                Ok(page) => {
                    if view.apply(&ticket, page) {
                        on_update(view);
                    }
                }
                // Only the very first load reports every failure
                Err(e) if initial && !pending => return Err(e),
                Err(ScanAlertError::Unauthorized) => return Err(ScanAlertError::Unauthorized),
                Err(e) => warn!("History refresh failed: {}", e),
            }
            if !pending {
                initial = false;
            }
        }

        tokio::select! {
            changed = alerts.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let Some(alert) = alerts.borrow_and_update().last_alert.clone() else {
                    continue;
                };
                if view.should_refetch(&alert) {
                    info!(
                        "New scan {} for child {}, refreshing history",
                        alert.log.id, view.child_id
                    );
                    pending = true;
                }
            }
            child = switches.recv(), if switches_open => match child {
                Some(child) => {
                    info!("Switching history from child {} to {}", view.child_id, child);
                    view.switch_child(child);
                    mark_present_alert(view, &mut alerts);
                    pending = true;
                }
                None => switches_open = false,
            },
        }
    }
}

fn mark_present_alert(view: &mut HistoryView, alerts: &mut watch::Receiver<AlertState>) {
    let current = alerts.borrow_and_update().last_alert.clone();
    if let Some(alert) = current {
        view.should_refetch(&alert);
    }
}

/// One-shot load for the map view, which shows a longer page than the
/// detail table
pub async fn load_map<H: HistorySource>(
    source: &H,
    token: &str,
    child_id: ChildId,
    limit: u32,
) -> Result<MapTrace, ScanAlertError> {
    let mut view = HistoryView::new(child_id, limit);
    view.refresh(source, token).await?;
    Ok(view.map_trace())
}
