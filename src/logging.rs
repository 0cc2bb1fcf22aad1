use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

fn debug_from_env() -> bool {
    std::env::var("FRESHDESK_HARVEST_DEBUG")
        .ok()
        .map(|v| {
            let normalized = v.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        })
        .unwrap_or(false)
}

/// Installs the global logger once. `RUST_LOG` still wins when set.
pub fn init(debug: bool) {
    INIT.get_or_init(|| {
        let default_level = if debug || debug_from_env() {
            "debug"
        } else {
            "info"
        };
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(default_level),
        )
        .format_timestamp_secs()
        .try_init();
    });
}

pub fn debug(message: impl AsRef<str>) {
    log::debug!("{}", message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    log::info!("{}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    log::warn!("{}", message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    log::error!("{}", message.as_ref());
}
