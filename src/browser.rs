use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Shared;

/// Opens URLs for the user.
pub trait Launcher: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The user's default browser.
pub struct SystemBrowser;

impl Launcher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Open `url` after a short random delay, giving the server time to start
/// accepting. Nothing is opened if `shutdown` fires first.
pub fn open_later(
    launcher: Shared<dyn Launcher>,
    url: String,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let delay = Duration::from_millis(rand::thread_rng().gen_range(690..=1000));

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                log::info!("Opening {url}");
                if let Err(err) = launcher.open(&url) {
                    log::error!("Failed to open browser: {err}");
                }
            }
            _ = shutdown.cancelled() => {}
        }
    })
}
