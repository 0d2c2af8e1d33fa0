use clap::Parser;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use remainder::browser::{open_later, SystemBrowser};
use remainder::config::Config;
use remainder::server::{self, App, Options};
use remainder::settings::Settings;
use remainder::trust::PortTrust;
use remainder::{logging, Shared};

/// Local page for keeping a MyAnimeList watch list up to date.
///
/// Without arguments the settings page opens and the server runs until
/// interrupted. With exactly one argument the watch list opens and the
/// server stops after the first status update.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// With two or more arguments the last one is the page to open
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Page opened in the browser for the given arguments.
fn route_for(args: &[String]) -> String {
    match args {
        [] => "/settings".to_string(),
        [_] => "/".to_string(),
        [.., last] => format!("/{}", last.trim_start_matches('/')),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let trust = PortTrust::new(config.port_path(), "/settings", config.port);
    if trust.deep_check().await {
        return Ok(());
    }

    let listener = trust.bind().await?;
    let lease = trust.acquire(listener.local_addr()?.port())?;

    let shutdown = CancellationToken::new();
    let app = App::new(
        Settings::load(config.settings_path())?,
        Shared::new(SystemBrowser),
        Options {
            data_dir: config.data_dir.clone(),
            timeout: config.timeout(),
            port: lease.port(),
            single_shot: cli.args.len() == 1,
        },
        shutdown.clone(),
    )?;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted");
            }
            shutdown.cancel();
        }
    });

    if config.browser {
        let url = format!("http://localhost:{}{}", lease.port(), route_for(&cli.args));
        open_later(Shared::new(SystemBrowser), url, shutdown.clone());
    }

    server::serve(listener, Shared::new(app)).await?;
    drop(lease);
    Ok(())
}
