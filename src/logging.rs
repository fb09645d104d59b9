/// Structured logging setup using tracing
///
/// stderr is the only console sink (stdout belongs to response payloads
/// and CLI output). When `log_file` is configured, log events are also
/// mirrored as append-only JSON lines for the deployment's collector,
/// whatever format the console is using.

use std::io::IsTerminal;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize the tracing subscriber.
///
/// - Console (stderr): human-readable with ANSI colors on a terminal,
///   JSON when piped or redirected
/// - File (`config.log_file`): JSON lines, append-only; an unopenable
///   path downgrades to console-only rather than failing startup
/// - Level from `config.log_level`; `RUST_LOG` overrides at runtime
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut file_error: Option<(String, std::io::Error)> = None;
    let file_layer = config.log_file.as_deref().and_then(|path| {
        let opened = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path);
        match opened {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            ),
            Err(e) => {
                file_error = Some((path.to_string(), e));
                None
            }
        }
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if std::io::stderr().is_terminal() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    match (&config.log_file, file_error) {
        (Some(_), Some((path, e))) => {
            tracing::warn!(path = %path, error = %e, "Could not open log file, logging to stderr only");
        }
        (Some(path), None) => {
            tracing::info!(path = %path, "Mirroring logs to file as JSON lines");
        }
        _ => {}
    }
}
