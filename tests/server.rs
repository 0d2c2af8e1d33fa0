use std::sync::Mutex;
use std::time::Duration;

use mockito::Server;
use reqwest::StatusCode;
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use remainder::browser::Launcher;
use remainder::server::{self, App, Options};
use remainder::settings::Settings;
use remainder::trust::PortTrust;
use remainder::Shared;

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<String>>,
}

impl Launcher for Recorder {
    fn open(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

struct Running {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<remainder::Result<()>>,
    http: reqwest::Client,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }
}

async fn start(api: &Server, dir: &TempDir, single_shot: bool) -> Running {
    let mut settings = Settings::load(dir.path().join("settings.json")).unwrap();
    let base = api.url();
    settings
        .merge([
            ("API", json!(base.clone())),
            ("ANIME_API", json!(format!("{base}/anime"))),
            ("OAUTH", json!(format!("{base}/oauth2"))),
            ("access_token", json!("access-1")),
        ])
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let app = App::new(
        settings,
        Shared::new(Recorder::default()),
        Options {
            data_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(5),
            port,
            single_shot,
        },
        shutdown.clone(),
    )
    .unwrap();

    let handle = tokio::spawn(server::serve(listener, Shared::new(app)));
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    Running {
        port,
        shutdown,
        handle,
        http,
    }
}

#[tokio::test]
async fn test_single_shot_update_stops_server() {
    let mut api = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let running = start(&api, &dir, true).await;

    let patch = api
        .mock("PATCH", "/anime/9/my_list_status")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let resp = running
        .http
        .post(running.url("/update-status"))
        .form(&[("animes", "9"), ("up_until", "1"), ("watched", "1"), ("total", "24")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::GONE);
    patch.assert_async().await;

    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_interactive_update_redirects_and_keeps_serving() {
    let api = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let running = start(&api, &dir, false).await;

    let resp = running
        .http
        .post(running.url("/update-status"))
        .form(&[("note", "no update")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()["location"], "/settings");

    let resp = running.http.get(running.url("/missing")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.text().await.unwrap().contains("No Page Found"));

    running.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_deep_check_sees_running_instance() {
    let api = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let running = start(&api, &dir, false).await;

    let trust = PortTrust::new(dir.path().join("port.json"), "/settings", None);
    assert!(!trust.deep_check().await);

    let lease = trust.acquire(running.port).unwrap();
    assert!(trust.deep_check().await);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
    drop(lease);
    assert!(trust.recorded().is_none());
}
