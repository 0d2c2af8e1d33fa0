mod pages;
mod router;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::MutexGuard;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use router::{split_overflow, Router, StatusUpdate};

use crate::browser::Launcher;
use crate::error::Result;
use crate::guard::Guard;
use crate::mal::{self, PendingAuthorization};
use crate::settings::Settings;
use crate::{Locked, Shared};

/// Everything a request handler may touch.
pub struct App {
    settings: Shared<Locked<Settings>>,
    client: mal::Client,
    launcher: Shared<dyn Launcher>,
    pending: Locked<Option<PendingAuthorization>>,
    data_dir: PathBuf,
    port: u16,
    single_shot: bool,
    shutdown: CancellationToken,
}

pub struct Options {
    pub data_dir: PathBuf,
    pub timeout: std::time::Duration,
    pub port: u16,
    /// Stop the server after the first status update
    pub single_shot: bool,
}

impl App {
    pub fn new(
        settings: Settings,
        launcher: Shared<dyn Launcher>,
        options: Options,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let settings = Shared::new(Locked::new(settings));
        let client = mal::Client::new(
            settings.clone(),
            Shared::new(Guard::new()),
            options.data_dir.join("static"),
            options.timeout,
        )?;

        Ok(Self {
            settings,
            client,
            launcher,
            pending: Locked::new(None),
            data_dir: options.data_dir,
            port: options.port,
            single_shot: options.single_shot,
            shutdown,
        })
    }

    pub fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn client(&self) -> &mal::Client {
        &self.client
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Start a new authorization in the browser, replacing any pending one.
    pub(crate) fn force_oauth(&self) -> Result<()> {
        let pending = PendingAuthorization::new(format!("http://localhost:{}/oauth", self.port));
        let url = pending.authorize_url(&self.settings())?;

        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pending);

        log::info!("Client credentials changed, re-authorizing");
        self.launcher.open(&url)?;
        Ok(())
    }

    /// Take the pending authorization if `state` belongs to it.
    pub(crate) fn take_pending(&self, state: Option<&str>) -> Option<PendingAuthorization> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match pending.as_ref() {
            Some(current) if current.matches(state) => pending.take(),
            _ => None,
        }
    }
}

/// Serve connections until `app.shutdown()` is cancelled.
///
/// Connections still open at that point finish the request they are
/// handling before closing, so the response that triggered the shutdown is
/// still delivered.
pub async fn serve(listener: TcpListener, app: Shared<App>) -> Result<()> {
    let shutdown = app.shutdown.clone();
    let tracker = TaskTracker::new();

    log::info!("Listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, addr): (_, SocketAddr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("Failed to accept connection: {err}");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let io = TokioIo::new(stream);
        let router = Router::new(app.clone());
        let shutdown = shutdown.clone();

        tracker.spawn(async move {
            let conn = http1::Builder::new().serve_connection(io, router);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };

            if let Err(err) = result {
                log::debug!("Error serving connection from {addr}: {err:?}");
            }
        });
    }

    tracker.close();
    tracker.wait().await;
    log::info!("Server stopped");
    Ok(())
}
