use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::{Path, PathBuf};
use std::fs;

use crate::cli::config::LogFormat;

/// `RUST_LOG`, when set, replaces the built-in directives entirely
fn build_filter(verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return Ok(EnvFilter::try_new(directives)?);
    }

    let level = if verbose { "debug" } else { "info" };
    Ok(EnvFilter::new("warn").add_directive(format!("lead_crawler={}", level).parse()?))
}

/// Initialize the logging system
pub fn init_logging(verbose: bool, format: LogFormat, log_file: Option<&Path>) -> Result<()> {
    let env_filter = build_filter(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())?;

    // Console output, either human-readable or one JSON object per line
    let console_layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    // If a log file is specified, create a file logger as well
    let file_layer = match log_file {
        Some(log_file) => {
            // Create parent directory if necessary
            if let Some(parent) = log_file.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }

            let file = fs::OpenOptions::new().create(true).append(true).open(log_file)?;
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(file)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Create a default log file path
pub fn default_log_file() -> PathBuf {
    let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "lead-crawler", "lead-crawler") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from("./logs")
    };

    path.push("worker.log");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_defaults() {
        let filter = build_filter(false, Some("lead_crawler=trace")).unwrap().to_string();
        assert!(filter.contains("lead_crawler=trace"));
        assert!(!filter.contains("lead_crawler=info"));
    }

    #[test]
    fn test_default_directives() {
        assert!(build_filter(false, None).unwrap().to_string().contains("lead_crawler=info"));
        assert!(build_filter(true, Some("  ")).unwrap().to_string().contains("lead_crawler=debug"));
    }
}
