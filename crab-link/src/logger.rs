//! Logging Infrastructure
//!
//! Console logging plus optional daily rotating files under `<log_dir>/link`,
//! deleted after 14 days. Library code only emits `tracing` events; binaries
//! call [`init_logger_with_file`] once at startup.

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, prelude::*};

/// Days a rotated log file is kept
const RETENTION_DAYS: i64 = 14;

/// Delete rotated `link.log.*` files older than the retention window
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    use chrono::{Local, TimeZone};

    let cutoff = Local::now() - chrono::Duration::days(RETENTION_DAYS);
    let dir = log_dir.join("link");
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // Appender output is `link.log.YYYY-MM-DD`
        let Some(date_part) = name.strip_prefix("link.log.") else {
            continue;
        };

        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && let Some(midnight) = date.and_hms_opt(0, 0, 0)
            && let Some(local) = Local.from_local_datetime(&midnight).single()
            && local < cutoff
        {
            fs::remove_file(&path)?;
            removed += 1;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(removed)
}

/// Initialize logging
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn"); `RUST_LOG` wins when set
/// * `json_format` - JSON lines instead of the human readable format
/// * `log_dir` - Optional directory for rotating file logs
///
/// # Examples
/// ```no_run
/// // Development setup (console only)
/// crab_link::logger::init_logger_with_file("debug", false, None)?;
///
/// // Kiosk setup (console + file)
/// crab_link::logger::init_logger_with_file("info", true, Some("./work_dir/logs"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let file_layer = match log_dir {
        Some(dir) => {
            let log_dir = Path::new(dir);
            let link_dir = log_dir.join("link");
            fs::create_dir_all(&link_dir)?;

            let appender = RollingFileAppender::new(Rotation::DAILY, link_dir, "link.log");
            let layer = if json_format {
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_writer(std::sync::Mutex::new(appender))
                    .boxed()
            } else {
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(appender))
                    .boxed()
            };

            tokio::spawn(periodic_cleanup(log_dir.to_path_buf()));
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Hourly cleanup of rotated files
async fn periodic_cleanup(log_dir: PathBuf) {
    use tokio::time::{Duration, sleep};

    loop {
        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
        sleep(Duration::from_secs(3600)).await;
    }
}

/// Initialize console-only logging
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}
