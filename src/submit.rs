//! Scan submission client
//!
//! One-shot mode acquires a single position and ends in `Done` or `Error`.
//! Continuous mode submits on every update of the location provider, keeps
//! going after failures, and only stops when toggled off, when its handle is
//! dropped, or when the provider runs out of updates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    api::ScanSink,
    errors::ScanAlertError,
    models::{Coordinates, DeviceInfo, ScanSubmission, SecureId},
};

pub const SHARED_MESSAGE: &str = "Location shared. Parent has been notified.";
const SEND_FAILED_MESSAGE: &str = "Failed to send location.";

/// Location acquisition failures, each with its user-facing text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied.")]
    PermissionDenied,

    #[error("Location unavailable.")]
    PositionUnavailable,

    #[error("Could not get location.")]
    Timeout,

    #[error("Geolocation is not supported by this device.")]
    Unsupported,
}

/// A position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coordinates: Coordinates,
    /// Radius in meters
    pub accuracy: Option<f64>,
}

impl std::str::FromStr for Position {
    type Err = LocationError;

    /// Parse `lat,lng[,accuracy]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(LocationError::PositionUnavailable);
        }
        let number = |p: &str| p.parse::<f64>().map_err(|_| LocationError::PositionUnavailable);

        let coordinates = Coordinates::new(number(parts[0])?, number(parts[1])?)
            .map_err(|_| LocationError::PositionUnavailable)?;
        let accuracy = match parts.get(2) {
            Some(p) => Some(number(p)?).filter(|a| *a >= 0.0),
            None => None,
        };
        Ok(Self {
            coordinates,
            accuracy,
        })
    }
}

/// Source of device positions
pub trait LocationProvider: Send + 'static {
    /// Acquire a single fix
    fn current_position(&mut self)
        -> impl Future<Output = Result<Position, LocationError>> + Send;

    /// Wait for the next update; None when the provider has ended
    fn next_update(
        &mut self,
    ) -> impl Future<Output = Option<Result<Position, LocationError>>> + Send;
}

/// Always reports the same position, updating at a fixed cadence
#[derive(Debug, Clone)]
pub struct FixedProvider {
    position: Position,
    interval: Duration,
    started: bool,
}

impl FixedProvider {
    pub fn new(position: Position, interval: Duration) -> Self {
        Self {
            position,
            interval,
            started: false,
        }
    }
}

impl LocationProvider for FixedProvider {
    async fn current_position(&mut self) -> Result<Position, LocationError> {
        Ok(self.position)
    }

    async fn next_update(&mut self) -> Option<Result<Position, LocationError>> {
        if self.started {
            tokio::time::sleep(self.interval).await;
        }
        self.started = true;
        Some(Ok(self.position))
    }
}

/// Reads `lat,lng[,accuracy]` lines, e.g. from stdin or a GPS bridge
pub struct LineProvider<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send + 'static> LineProvider<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    async fn read(&mut self) -> Option<Result<Position, LocationError>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let parsed = line.parse::<Position>();
                    if parsed.is_err() {
                        warn!("Unreadable position line: {:?}", line);
                    }
                    return Some(parsed);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!("Position input failed: {}", e);
                    return Some(Err(LocationError::PositionUnavailable));
                }
            }
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> LocationProvider for LineProvider<R> {
    async fn current_position(&mut self) -> Result<Position, LocationError> {
        self.read().await.unwrap_or(Err(LocationError::Timeout))
    }

    async fn next_update(&mut self) -> Option<Result<Position, LocationError>> {
        self.read().await
    }
}

/// Provider for devices without any location source
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProvider;

impl LocationProvider for UnsupportedProvider {
    async fn current_position(&mut self) -> Result<Position, LocationError> {
        Err(LocationError::Unsupported)
    }

    async fn next_update(&mut self) -> Option<Result<Position, LocationError>> {
        None
    }
}

/// Display state of the submitting page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmitStatus {
    #[default]
    Idle,
    GettingLocation,
    Sending,
    Done(String),
    Error(String),
}

impl SubmitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmitStatus::Done(_) | SubmitStatus::Error(_))
    }

    /// Outcome of a finished one-shot submission
    ///
    /// `Done` yields its confirmation, `Error` its user message as an error,
    /// and a status still in progress yields nothing.
    pub fn into_result(self) -> Result<Option<String>, ScanAlertError> {
        match self {
            SubmitStatus::Done(message) => Ok(Some(message)),
            SubmitStatus::Error(message) => Err(ScanAlertError::SubmissionFailed(message)),
            _ => Ok(None),
        }
    }
}

/// Progress of a continuous submission run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContinuousProgress {
    pub status: SubmitStatus,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Submits scan reports for one child
pub struct Submitter<S> {
    sink: Arc<S>,
    secure_id: SecureId,
    message: Option<String>,
    device_info: DeviceInfo,
    status: SubmitStatus,
}

impl<S: ScanSink> Submitter<S> {
    pub fn new(sink: Arc<S>, secure_id: SecureId, device_info: DeviceInfo) -> Self {
        Self {
            sink,
            secure_id,
            message: None,
            device_info,
            status: SubmitStatus::Idle,
        }
    }

    /// Operator status message; blank means none
    pub fn with_message(mut self, message: Option<&str>) -> Self {
        self.message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        self
    }

    pub fn status(&self) -> &SubmitStatus {
        &self.status
    }

    /// Back to idle, the manual "try again"
    pub fn reset(&mut self) {
        self.status = SubmitStatus::Idle;
    }

    /// Acquire one position and submit it
    pub async fn submit_once<P: LocationProvider>(&mut self, provider: &mut P) -> &SubmitStatus {
        self.status = SubmitStatus::GettingLocation;

        let position = match provider.current_position().await {
            Ok(position) => position,
            Err(e) => {
                warn!("Location acquisition failed: {}", e);
                self.status = SubmitStatus::Error(e.to_string());
                return &self.status;
            }
        };

        self.status = SubmitStatus::Sending;
        let submission = build_submission(&position, &self.message, &self.device_info);
        self.status = match self.sink.submit_scan(&self.secure_id, &submission).await {
            Ok(_) => {
                info!("Scan submitted for {}", self.secure_id);
                SubmitStatus::Done(SHARED_MESSAGE.to_string())
            }
            Err(e) => {
                warn!("Scan submission failed: {}", e);
                SubmitStatus::Error(failure_message(&e))
            }
        };
        &self.status
    }

    /// Submit on every provider update until stopped
    pub fn start_continuous<P: LocationProvider>(&self, mut provider: P) -> ContinuousHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (progress_tx, progress_rx) = watch::channel(ContinuousProgress {
            status: SubmitStatus::GettingLocation,
            ..Default::default()
        });

        let sink = Arc::clone(&self.sink);
        let secure_id = self.secure_id.clone();
        let message = self.message.clone();
        let device_info = self.device_info.clone();

        let handle = tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("Continuous submission stopped");
                        break;
                    }
                    update = provider.next_update() => update,
                };

                let position = match update {
                    Some(Ok(position)) => position,
                    Some(Err(e)) => {
                        warn!("Location update failed: {}", e);
                        progress_tx.send_modify(|p| p.last_error = Some(e.to_string()));
                        continue;
                    }
                    None => {
                        info!("Location provider ended");
                        break;
                    }
                };

                progress_tx.send_modify(|p| {
                    p.status = SubmitStatus::Sending;
                    p.attempts += 1;
                });
                let submission = build_submission(&position, &message, &device_info);
                match sink.submit_scan(&secure_id, &submission).await {
                    Ok(_) => progress_tx.send_modify(|p| p.successes += 1),
                    Err(e) => {
                        warn!("Scan submission failed: {}", e);
                        progress_tx.send_modify(|p| {
                            p.failures += 1;
                            p.last_error = Some(failure_message(&e));
                        });
                    }
                }
            }
            let progress = progress_tx.borrow().clone();
            progress
        });

        ContinuousHandle {
            stop: Some(stop_tx),
            progress: progress_rx,
            handle: Some(handle),
        }
    }
}

/// Owner of a continuous submission task
///
/// Dropping the handle stops the task.
pub struct ContinuousHandle {
    stop: Option<oneshot::Sender<()>>,
    progress: watch::Receiver<ContinuousProgress>,
    handle: Option<JoinHandle<ContinuousProgress>>,
}

impl ContinuousHandle {
    pub fn progress(&self) -> ContinuousProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContinuousProgress> {
        self.progress.clone()
    }

    /// Toggle continuous mode off and wait for the task to wind down
    pub async fn stop(mut self) -> ContinuousProgress {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join().await
    }

    /// Wait until the provider runs out of updates
    pub async fn finished(mut self) -> ContinuousProgress {
        self.join().await
    }

    async fn join(&mut self) -> ContinuousProgress {
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(progress) => progress,
                Err(e) => {
                    warn!("Continuous submission task failed: {}", e);
                    self.progress.borrow().clone()
                }
            },
            None => self.progress.borrow().clone(),
        }
    }
}

impl Drop for ContinuousHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

fn build_submission(
    position: &Position,
    message: &Option<String>,
    device_info: &DeviceInfo,
) -> ScanSubmission {
    let mut submission = ScanSubmission::new(position.coordinates);
    submission.accuracy = position.accuracy;
    submission.timestamp = Some(Utc::now());
    submission.message = message.clone();
    submission.device_info = Some(device_info.clone());
    submission
}

fn failure_message(error: &ScanAlertError) -> String {
    match error {
        ScanAlertError::Status { message, .. } => message.clone(),
        _ => SEND_FAILED_MESSAGE.to_string(),
    }
}
