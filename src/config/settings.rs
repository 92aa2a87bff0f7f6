use anyhow::{Context, Result};
use rand::Rng;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::tracker::engine::DEFAULT_IDLE_THRESHOLD_SECS;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// `None` when `DATABASE_URL` is unset; sessions are then only logged.
    pub database_url: Option<String>,
    pub listen: SocketAddr,
    pub idle_threshold_secs: i64,
    pub track_pointer: bool,
}

/// Values given on the command line; each one overrides the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<String>,
    pub threshold: Option<i64>,
    pub track_pointer: bool,
}

impl Settings {
    fn env_path() -> Result<PathBuf> {
        Ok(env::current_dir()?.join(".env"))
    }

    pub fn new(overrides: &Overrides) -> Result<Self> {
        let env_path = Self::env_path()?;
        if !env_path.exists() {
            log::info!("No .env found. Generating local database credentials...");
            Self::write_default_env(&env_path)?;
        }
        dotenvy::from_path(&env_path).ok();

        let database_url = env::var("DATABASE_URL").ok();

        Self::resolve(
            database_url,
            env::var("TRACKER_LISTEN").ok(),
            env::var("IDLE_THRESHOLD_SECS").ok(),
            env::var("TRACK_POINTER").ok(),
            overrides,
        )
    }

    /// Combines raw environment values with command-line overrides.
    fn resolve(
        database_url: Option<String>,
        listen: Option<String>,
        threshold: Option<String>,
        track_pointer: Option<String>,
        overrides: &Overrides,
    ) -> Result<Self> {
        let listen = overrides
            .listen
            .clone()
            .or(listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", listen))?;

        let idle_threshold_secs = match (overrides.threshold, threshold) {
            (Some(secs), _) => secs,
            (None, Some(raw)) => raw
                .trim()
                .parse()
                .with_context(|| format!("IDLE_THRESHOLD_SECS is not a number: '{}'", raw))?,
            (None, None) => DEFAULT_IDLE_THRESHOLD_SECS,
        };
        if idle_threshold_secs <= 0 {
            anyhow::bail!("idle threshold must be positive, got {}", idle_threshold_secs);
        }

        let database_url = database_url.filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            log::warn!("DATABASE_URL is not set; sessions will not be saved");
        }

        let track_pointer = overrides.track_pointer
            || track_pointer
                .and_then(|v| v.trim().parse::<bool>().ok())
                .unwrap_or(false);

        Ok(Self {
            database_url,
            listen,
            idle_threshold_secs,
            track_pointer,
        })
    }

    fn write_default_env(env_path: &Path) -> Result<()> {
        let (username, password) = Self::generate_credentials();
        let database_url = format!("postgres://{}:{}@localhost:5432/task_db", username, password);

        let env_content = format!(
            "# Generated on first run. Create the matching Postgres role, or point\n\
             # DATABASE_URL at an existing database.\n\
             POSTGRES_USERNAME={username}\n\
             POSTGRES_PASSWORD={password}\n\
             DATABASE_URL={database_url}\n\
             \n\
             TRACKER_LISTEN={DEFAULT_LISTEN}\n\
             IDLE_THRESHOLD_SECS={DEFAULT_IDLE_THRESHOLD_SECS}\n\
             TRACK_POINTER=false\n"
        );
        fs::write(env_path, env_content)?;

        log::info!("Wrote {} (user {})", env_path.display(), username);
        Ok(())
    }

    fn generate_credentials() -> (String, String) {
        const ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        let mut pick = |len: usize, alphabet: &[u8]| -> String {
            (0..len)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
                .collect()
        };

        let username = format!("procrastination_{}", pick(8, &ALPHANUMERIC[..36]));
        let password = pick(32, ALPHANUMERIC);
        (username, password)
    }
}
