use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_LEVEL_ENV: &str = "KANBAN_SYNC_LOG_LEVEL";

/// Installs a stderr subscriber for hosts that have none of their own
///
/// `KANBAN_SYNC_LOG_LEVEL` overrides `default_level`.
pub fn init_logging(default_level: &str) -> anyhow::Result<()> {
    let env_filter = build_log_filter(default_level);

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()?;

    tracing::info!("Logging initialized");
    Ok(())
}

fn build_log_filter(default_level: &str) -> EnvFilter {
    let fallback = normalize_log_level(default_level).unwrap_or("warn");
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|raw| normalize_log_level(raw.as_str()))
        .unwrap_or(fallback);
    EnvFilter::new(format!("{level},kanban_sync={level}"))
}

pub(crate) fn normalize_log_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}
