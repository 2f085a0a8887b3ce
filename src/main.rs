//! Scan alerts utility

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use scan_alerts::{
    api::{ApiClient, HistoryQuery},
    config::AppConfig,
    errors::ScanAlertError,
    history::{follow_history, load_map, HistoryView},
    map::{MapTrace, Viewport},
    models::{ChildId, Coordinates, DeviceInfo, ParentId, RecordId, ScanRecord, SecureId},
    presentation::{Banner, HistoryRow},
    session::Session,
    store::AlertState,
    submit::{FixedProvider, LineProvider, Position, Submitter, UnsupportedProvider},
};

#[derive(Parser)]
#[command(name = "scan-alerts")]
#[command(about = "Real-time QR scan alerts for child safety")]
#[command(
    after_help = "Environment:\n  SCANALERTS__SESSION__TOKEN  Parent session token\n  RUST_LOG                    Log filter"
)]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow live alerts of the parent session; enter dismisses the banner
    Watch {
        /// Also keep this child's history reconciled
        #[arg(long)]
        child: Option<String>,
    },
    /// Share the current location once
    Submit {
        secure_id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
        #[arg(long)]
        accuracy: Option<f64>,
        #[arg(long)]
        message: Option<String>,
    },
    /// Share every `lat,lng[,accuracy]` line read from stdin
    Track {
        secure_id: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Print a page of a child's scan history
    History {
        child_id: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Print a child's most recent scan
    Last { child_id: String },
    /// Print the map trace over a child's longer history page
    Map { child_id: String },
}

#[tokio::main]
async fn main() -> Result<(), ScanAlertError> {
    #[cfg(feature = "dotenvy")]
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_with(&cli.config)?;
    config.validate()?;

    let api = Arc::new(ApiClient::new(&config.api)?);

    match cli.command {
        Commands::Watch { child } => run_watch(&config, &api, child.map(ChildId::new)).await,
        Commands::Submit {
            secure_id,
            lat,
            lng,
            accuracy,
            message,
        } => {
            let secure_id = SecureId::try_from(secure_id.as_str())?;
            let position = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(Position {
                    coordinates: Coordinates::new(lat, lng)?,
                    accuracy,
                }),
                _ => None,
            };
            run_submit(api, secure_id, position, message).await
        }
        Commands::Track { secure_id, message } => {
            let secure_id = SecureId::try_from(secure_id.as_str())?;
            run_track(api, secure_id, message).await
        }
        Commands::History {
            child_id,
            limit,
            skip,
        } => {
            let token = require_token(&config)?;
            let page = api
                .history(&token, &ChildId::new(child_id), HistoryQuery { limit, skip })
                .await?;
            print_records(&page.logs);
            println!("{} of {} scans", page.logs.len(), page.total);
            Ok(())
        }
        Commands::Map { child_id } => {
            let token = require_token(&config)?;
            let trace = load_map(
                api.as_ref(),
                &token,
                ChildId::new(child_id),
                config.history.map_limit,
            )
            .await?;
            print_map(&trace);
            Ok(())
        }
        Commands::Last { child_id } => {
            let token = require_token(&config)?;
            match api.last_location(&token, &ChildId::new(child_id)).await? {
                Some(record) => print_records(&[record]),
                None => println!("No scans yet."),
            }
            Ok(())
        }
    }
}

fn require_token(config: &AppConfig) -> Result<String, ScanAlertError> {
    config
        .session
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ScanAlertError::ConfigurationError {
            message: "A session token is required (SCANALERTS__SESSION__TOKEN)".to_string(),
        })
}

async fn run_watch(
    config: &AppConfig,
    api: &ApiClient,
    child: Option<ChildId>,
) -> Result<(), ScanAlertError> {
    let token = require_token(config)?;
    let parent_id = config.session.parent_id.as_deref().map(ParentId::from);
    let session = Session::start(&config.channel, &token, parent_id)?;

    let history = async {
        match child {
            Some(child_id) => {
                let mut view = HistoryView::new(child_id, config.history.limit);
                follow_history(api, &token, &mut view, session.subscribe(), print_view).await
            }
            None => std::future::pending().await,
        }
    };

    let dismissals = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            session.acknowledge();
        }
        std::future::pending::<()>().await
    };

    let result = tokio::select! {
        _ = print_alerts(session.subscribe()) => Ok(()),
        result = history => result,
        _ = dismissals => Ok(()),
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    session.end();
    result
}

/// Print connectivity changes and every new banner
async fn print_alerts(mut alerts: watch::Receiver<AlertState>) {
    let mut connected = false;
    let mut shown: Option<RecordId> = None;

    while alerts.changed().await.is_ok() {
        let state = alerts.borrow_and_update().clone();
        if state.connected != connected {
            connected = state.connected;
            println!(
                "{}",
                if connected {
                    "● connected"
                } else {
                    "○ disconnected"
                }
            );
        }

        let current = state.last_alert.as_ref().map(|a| a.log.id.clone());
        if current != shown {
            if let Some(banner) = Banner::from_state(&state) {
                println!("[{}] {}", banner.label(), banner.render());
            }
            shown = current;
        }
    }
}

fn print_view(view: &HistoryView) {
    print_rows(&view.rows());
    if let Some(footer) = view.footer() {
        println!("{}", footer);
    }
}

fn print_map(trace: &MapTrace) {
    for marker in &trace.markers {
        let popup = &marker.popup;
        println!(
            "{} {}  {:.5}, {:.5}  {}  accuracy {}",
            if popup.severity.is_danger() { "!" } else { " " },
            popup.time,
            marker.position.latitude,
            marker.position.longitude,
            popup.message.as_deref().unwrap_or("—"),
            popup.accuracy
        );
    }
    match &trace.viewport {
        Viewport::Fit { bounds, .. } => println!(
            "map: {} markers, path through {} points, bounds [{:.5}, {:.5}] – [{:.5}, {:.5}]",
            trace.markers.len(),
            trace.path.len(),
            bounds.south,
            bounds.west,
            bounds.north,
            bounds.east
        ),
        Viewport::Default { .. } => println!("map: no points"),
    }
}

fn print_records(records: &[ScanRecord]) {
    let rows: Vec<HistoryRow> = records.iter().map(HistoryRow::from_record).collect();
    print_rows(&rows);
}

fn print_rows(rows: &[HistoryRow]) {
    for row in rows {
        let marker = if row.severity.is_danger() { "!" } else { " " };
        println!(
            "{} {}  {:<30}  {}  {}  {}",
            marker, row.time, row.message, row.location, row.maps_link, row.device
        );
    }
}

async fn run_submit(
    api: Arc<ApiClient>,
    secure_id: SecureId,
    position: Option<Position>,
    message: Option<String>,
) -> Result<(), ScanAlertError> {
    let mut submitter =
        Submitter::new(api, secure_id, DeviceInfo::detect()).with_message(message.as_deref());

    let status = match position {
        Some(position) => {
            let mut provider = FixedProvider::new(position, Duration::from_secs(5));
            submitter.submit_once(&mut provider).await.clone()
        }
        None => submitter.submit_once(&mut UnsupportedProvider).await.clone(),
    };

    if let Some(message) = status.into_result()? {
        println!("{}", message);
    }
    Ok(())
}

async fn run_track(
    api: Arc<ApiClient>,
    secure_id: SecureId,
    message: Option<String>,
) -> Result<(), ScanAlertError> {
    let submitter =
        Submitter::new(api, secure_id, DeviceInfo::detect()).with_message(message.as_deref());
    let provider = LineProvider::new(BufReader::new(tokio::io::stdin()));
    let handle = submitter.start_continuous(provider);

    let mut progress = handle.subscribe();
    let printer = async {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            println!(
                "sent {} / failed {}{}",
                p.successes,
                p.failures,
                p.last_error
                    .map(|e| format!(" (last error: {})", e))
                    .unwrap_or_default()
            );
        }
    };

    tokio::select! {
        _ = printer => {}
        _ = signal::ctrl_c() => info!("Received shutdown signal"),
    }

    let summary = handle.stop().await;
    info!(
        "Continuous sharing ended after {} attempts ({} failed)",
        summary.attempts, summary.failures
    );
    Ok(())
}
