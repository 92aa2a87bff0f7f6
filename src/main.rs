mod api;
mod config;
mod database;
mod input;
mod models;
mod tracker;

use anyhow::Result;
use chrono::Local;
use clap::{Arg, ArgAction, Command};
use dotenvy::dotenv;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::routes::{self, AppState};
use crate::config::settings::{Overrides, Settings};
use crate::database::connection::Database;
use crate::database::writer;
use crate::tracker::engine::{IdleTracker, StopOutcome};
use crate::tracker::ticker::{self, TICK_PERIOD};

/// A writer that flushes after every write so log lines survive a crash
struct FlushingWriter {
    inner: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

fn init_logging() -> Result<()> {
    let debug_enabled = env::var("DEBUG_LOGS_ENABLED")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    if debug_enabled {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("tracker.log")?;

        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("procrastination_tracker=debug"),
        )
        .target(env_logger::Target::Pipe(Box::new(FlushingWriter::new(log_file))))
        .init();

        log::info!("=== DEBUG LOGGING ENABLED ===");
        log::info!("Writing logs to tracker.log");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }
    Ok(())
}

fn cli() -> Command {
    Command::new("Procrastination Tracker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Track idle time while you work and score your procrastination")
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Address for the HTTP API (default 127.0.0.1:5000)"),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(i64))
                .help("Seconds without input before you count as idle"),
        )
        .arg(
            Arg::new("track-pointer")
                .long("track-pointer")
                .help("Count mouse movement and clicks as activity, not only key presses")
                .action(ArgAction::SetTrue),
        )
}

/// Resolves once SIGINT or SIGTERM has been received.
async fn shutdown_signal(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    log::info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    dotenv().ok();
    init_logging()?;

    let overrides = Overrides {
        listen: matches.get_one::<String>("listen").cloned(),
        threshold: matches.get_one::<i64>("threshold").copied(),
        track_pointer: matches.get_flag("track-pointer"),
    };
    let settings = Settings::new(&overrides)?;
    log::info!("Starting procrastination tracker with {:?}", settings.listen);

    // The tracker keeps working without a database; sessions are then only logged.
    let database = match settings.database_url.as_deref() {
        None => {
            eprintln!("⚠️  DATABASE_URL is not set; sessions will not be saved.");
            None
        }
        Some(url) => match Database::new(url).await {
            Ok(db) => match db.create_table().await {
                Ok(()) => {
                    log::info!("Table 'idle' is ready");
                    Some(db)
                }
                Err(e) => {
                    log::error!("Failed to create table 'idle': {}", e);
                    None
                }
            },
            Err(e) => {
                log::error!("Database connection failed: {}", e);
                eprintln!("⚠️  Could not connect to the database; sessions will not be saved.");
                eprintln!("   Check DATABASE_URL in .env. Error: {}", e);
                None
            }
        },
    };

    let (persistence, writer_handle) = match database.clone() {
        Some(db) => {
            let (tx, handle) = writer::spawn_writer(db);
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let source = input::detect_source(settings.track_pointer);
    let tracker = Arc::new(IdleTracker::new(
        settings.idle_threshold_secs,
        Arc::clone(&source),
        persistence,
    )?);
    source.listen(Arc::clone(&tracker));
    let ticker_handle = ticker::spawn_ticker(Arc::clone(&tracker), TICK_PERIOD);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_flag))?;

    let app = routes::router(AppState {
        tracker: Arc::clone(&tracker),
        database,
    });
    let listener = tokio::net::TcpListener::bind(settings.listen).await?;
    println!("Procrastination tracker listening on http://{}", settings.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_flag))
        .await?;

    ticker_handle.abort();
    match tracker.stop(Local::now()) {
        Ok(StopOutcome::Stopped(record)) => {
            log::info!("Stopped running session on exit (score={})", record.procrastination_score)
        }
        Ok(StopOutcome::NotRunning) => {}
        Err(e) => log::error!("Failed to stop session cleanly on exit: {}", e),
    }

    // Closing the channel lets the writer finish pending inserts.
    tracker.close_persistence();
    if let Some(handle) = writer_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(_) => log::info!("Session writer drained"),
            Err(_) => log::warn!("Timed out waiting for the session writer"),
        }
    }

    Ok(())
}
