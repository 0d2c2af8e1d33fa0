use reqwest::StatusCode;

/// Install the global logger. `RUST_LOG` overrides the default filter.
pub fn init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("remainder=info"),
    )
    .format_timestamp_millis()
    .try_init();
}

pub struct ResponseLogger;

impl ResponseLogger {
    pub fn log_error(url: &str, status: StatusCode, body: &str) {
        log::warn!("[{status}] {url}: {}", body.replace('\n', ""));
    }
}
