use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logging::ResponseLogger;
use crate::settings::persist;

const GOOGLE_ICAL: &str = "https://calendar.google.com/calendar/ical";

/// Where a calendar setting points. A full http(s) URL is used as-is,
/// anything else is taken to be a public Google Calendar id.
pub fn feed_url(calendar: &str) -> String {
    match reqwest::Url::parse(calendar) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => calendar.to_string(),
        _ => format!(
            "{GOOGLE_ICAL}/{}/public/basic.ics",
            urlencoding::encode(calendar)
        ),
    }
}

/// Download the calendar feed into `<data_dir>/calendar.ics`.
pub async fn quick_save(http: &reqwest::Client, data_dir: &Path, calendar: &str) -> Result<PathBuf> {
    let url = feed_url(calendar);
    log::info!("Saving calendar from {url}");

    let resp = http.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        ResponseLogger::log_error(&url, status, &body);
        return Err(Error::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let path = data_dir.join("calendar.ics");
    persist(&path, &resp.bytes().await?)?;
    Ok(path)
}
