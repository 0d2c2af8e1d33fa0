//! Thin client for the MyAnimeList v2 API.
//!
//! Base URLs and credentials are read from the settings store on every call,
//! so edits made on the settings page apply to the very next request.

pub mod auth;
pub mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::MutexGuard;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::{Map, Value};

pub use auth::PendingAuthorization;
pub use types::WatchEntry;

use crate::error::{Error, Result};
use crate::guard::Guard;
use crate::logging::ResponseLogger;
use crate::settings::{persist, Settings};
use crate::{token, Locked, Shared};

/// Page size requested from the watch list endpoint.
const PAGE_LIMIT: u32 = 100;
/// Upper bound on followed `paging.next` links.
const MAX_PAGES: usize = 50;

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    settings: Shared<Locked<Settings>>,
    guard: Shared<Guard>,
    static_dir: PathBuf,
}

impl Client {
    pub fn new(
        settings: Shared<Locked<Settings>>,
        guard: Shared<Guard>,
        static_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            settings,
            guard,
            static_dir,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Base URL for `key` together with the authorization header.
    fn authorized(&self, key: &str) -> Result<(String, HeaderMap)> {
        let settings = self.settings();
        if !settings.has_token() {
            return Err(Error::NoToken);
        }
        Ok((settings.get_str(key)?, settings.headers()?))
    }

    /// Check the response status, logging and returning the body on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        ResponseLogger::log_error(&url, status, &body);
        Err(Error::Api {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn json_object(resp: reqwest::Response) -> Result<Map<String, Value>> {
        let body = Self::check_response(resp).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch the "about me" profile and store it, picture included.
    pub async fn fetch_profile(&self) -> Result<()> {
        let _entered = self.guard.try_enter()?;
        self.profile().await
    }

    /// Trade the refresh token for a new access token.
    pub async fn refresh_token(&self) -> Result<()> {
        let _entered = self.guard.try_enter()?;
        self.token().await
    }

    /// Profile then token, as a single guarded operation.
    pub async fn refresh(&self) -> Result<()> {
        let _entered = self.guard.try_enter()?;
        self.profile().await?;
        self.token().await
    }

    async fn profile(&self) -> Result<()> {
        let (url, headers) = {
            let settings = self.settings();
            (format!("{}/@me", settings.get_str("API")?), settings.headers()?)
        };

        log::info!("Fetching profile");
        let resp = self.http.get(url).headers(headers).send().await?;
        let mut profile = Self::json_object(resp).await?;

        let picture = match profile.get("picture").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => self.save_picture(url).await?,
            _ => String::new(),
        };
        profile.insert("picture".to_string(), Value::String(picture));

        if let Some(id) = profile.remove("id") {
            let id = match id {
                Value::String(id) => id,
                other => other.to_string(),
            };
            profile.insert("id".to_string(), Value::String(id));
        }

        self.settings().merge(profile)
    }

    /// Download the profile picture next to the other static files and
    /// return its extension, which is all the settings keep of it.
    async fn save_picture(&self, url: &str) -> Result<String> {
        let extension = picture_extension(url);
        let resp = Self::check_response(self.http.get(url).send().await?).await?;
        let bytes = resp.bytes().await?;
        persist(
            &self.static_dir.join(format!("Profile{extension}")),
            &bytes,
        )?;
        Ok(extension)
    }

    async fn token(&self) -> Result<()> {
        let (url, form) = {
            let settings = self.settings();
            (
                format!("{}/token", settings.get_str("OAUTH")?),
                auth::refresh_form(&settings)?,
            )
        };

        log::info!("Refreshing token");
        let resp = self.http.post(url).form(&form).send().await?;
        let fields = Self::json_object(resp).await?;
        self.settings().merge(token::stamp(fields, token::now()))
    }

    /// Redeem an authorization code for a fresh token pair.
    ///
    /// The stored profile id is cleared so the next settings view fetches the
    /// profile of whoever just authorized.
    pub async fn exchange_code(&self, pending: &PendingAuthorization, code: &str) -> Result<()> {
        let _entered = self.guard.try_enter()?;
        let (url, form) = {
            let settings = self.settings();
            (
                format!("{}/token", settings.get_str("OAUTH")?),
                pending.exchange_form(&settings, code)?,
            )
        };

        log::info!("Exchanging authorization code");
        let resp = self.http.post(url).form(&form).send().await?;
        let mut fields = token::stamp(Self::json_object(resp).await?, token::now());
        fields.insert("id".to_string(), Value::String(String::new()));
        self.settings().merge(fields)
    }

    /// Every show on the user's list with status "watching", following
    /// pagination to the end. A `next` link already visited, or more than
    /// [`MAX_PAGES`] pages, ends the walk.
    pub async fn list_watching(&self) -> Result<Vec<WatchEntry>> {
        let (api, headers) = self.authorized("API")?;
        let mut url = format!(
            "{api}/@me/animelist?status=watching&fields=list_status,num_episodes&limit={PAGE_LIMIT}"
        );

        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        loop {
            if visited.len() >= MAX_PAGES || !visited.insert(url.clone()) {
                log::warn!("Stopped following watch list pages at {url}");
                break;
            }

            let resp = self.http.get(&url).headers(headers.clone()).send().await?;
            let body = Self::check_response(resp).await?.text().await?;
            let page: types::ListPage = serde_json::from_str(&body)?;

            entries.extend(page.data.into_iter().map(types::ListItem::into_entry));

            match page.paging.and_then(|paging| paging.next) {
                Some(next) => url = next,
                None => break,
            }
        }

        log::debug!("Fetched {} watching entries", entries.len());
        Ok(entries)
    }

    /// Set the watched episode count of one show. Reaching the total marks
    /// it completed.
    pub async fn post_status(&self, id: u64, progress: u32, total: u32) -> Result<()> {
        let (api, headers) = self.authorized("ANIME_API")?;

        let (progress, status) = if total > 0 && progress >= total {
            (total, "completed")
        } else {
            (progress, "watching")
        };

        log::info!("Updating {id} to {progress}/{total} ({status})");
        // MAL takes list updates as a form-encoded PATCH.
        let resp = self
            .http
            .patch(format!("{api}/{id}/my_list_status"))
            .headers(headers)
            .form(&[
                ("num_watched_episodes", progress.to_string()),
                ("status", status.to_string()),
            ])
            .send()
            .await?;

        Self::check_response(resp).await?;
        Ok(())
    }
}

/// Extension of the picture URL's path, dot included (`".jpg"`), or empty.
fn picture_extension(url: &str) -> String {
    let path = reqwest::Url::parse(url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    Path::new(&path)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| format!(".{extension}"))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use tempfile::TempDir;

    /// A client whose every base URL points at `server`.
    pub(crate) fn client_for(server: &Server, dir: &TempDir) -> Client {
        let mut settings = Settings::load(dir.path().join("settings.json")).unwrap();
        let base = server.url();
        settings
            .merge([
                ("API", json!(base.clone())),
                ("ANIME_API", json!(format!("{base}/anime"))),
                ("OAUTH", json!(format!("{base}/oauth2"))),
                ("CLIENT_ID", json!("client")),
                ("CLIENT_SECRET", json!("secret")),
                ("access_token", json!("access-1")),
                ("refresh_token", json!("refresh-1")),
                ("now", json!(1000)),
                ("expires_in", json!(100)),
            ])
            .unwrap();

        Client::new(
            Shared::new(Locked::new(settings)),
            Shared::new(Guard::new()),
            dir.path().join("static"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_picture_extension() {
        assert_eq!(
            picture_extension("https://cdn.myanimelist.net/images/userimages/1.jpg?t=17"),
            ".jpg"
        );
        assert_eq!(picture_extension("https://cdn.example.com/avatar"), "");
    }

    #[tokio::test]
    async fn test_fetch_profile_saves_picture() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        let profile = server
            .mock("GET", "/@me")
            .match_header("authorization", "Bearer access-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": 4242,
                    "name": "someone",
                    "picture": format!("{}/images/user.png", server.url()),
                })
                .to_string(),
            )
            .create_async()
            .await;
        let picture = server
            .mock("GET", "/images/user.png")
            .with_status(200)
            .with_body(b"\x89PNG")
            .create_async()
            .await;

        client.fetch_profile().await.unwrap();

        profile.assert_async().await;
        picture.assert_async().await;
        let settings = client.settings().clone();
        assert_eq!(settings.get_str("id").unwrap(), "4242");
        assert_eq!(settings.get_str("name").unwrap(), "someone");
        assert_eq!(settings.get_str("picture").unwrap(), ".png");
        assert_eq!(
            std::fs::read(dir.path().join("static/Profile.png")).unwrap(),
            b"\x89PNG"
        );
    }

    #[tokio::test]
    async fn test_fetch_profile_failure_leaves_settings() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);
        let before = client.settings().values().clone();

        server
            .mock("GET", "/@me")
            .with_status(401)
            .with_body(r#"{"error":"invalid_token"}"#)
            .create_async()
            .await;

        let err = client.fetch_profile().await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 401, .. }));
        assert_eq!(client.settings().values(), &before);
    }

    #[tokio::test]
    async fn test_refresh_token_stamps_now() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        let mock = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
                Matcher::UrlEncoded("client_id".into(), "client".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "token_type": "Bearer",
                    "expires_in": 2678400,
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                    "now": 7,
                })
                .to_string(),
            )
            .create_async()
            .await;

        let before = token::now();
        client.refresh_token().await.unwrap();
        mock.assert_async().await;

        let settings = client.settings().clone();
        assert_eq!(settings.get_str("access_token").unwrap(), "access-2");
        assert_eq!(settings.get_str("refresh_token").unwrap(), "refresh-2");
        assert!(settings.get_i64("now").unwrap() >= before);
        assert!(!settings.lifetime(token::now()).unwrap().expired());
    }

    #[tokio::test]
    async fn test_guarded_operations_fail_fast_while_locked() {
        let server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);
        let before = client.settings().values().clone();

        let held = client.guard().try_enter().unwrap();
        assert!(matches!(client.fetch_profile().await, Err(Error::Locked)));
        assert!(matches!(client.refresh_token().await, Err(Error::Locked)));
        assert!(matches!(client.refresh().await, Err(Error::Locked)));
        drop(held);

        assert_eq!(client.settings().values(), &before);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_one_wins() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"access-2","expires_in":60}"#)
            .create_async()
            .await;

        // The first refresh holds the guard across its request, so the second
        // is rejected without reaching the server.
        let (first, second) = tokio::join!(client.refresh_token(), client.refresh_token());
        let locked = [&first, &second]
            .iter()
            .filter(|result| matches!(result, Err(Error::Locked)))
            .count();
        assert_eq!(locked, 1);
        assert!(first.is_ok() || second.is_ok());
    }

    #[tokio::test]
    async fn test_list_watching_follows_paging() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        server
            .mock("GET", "/@me/animelist")
            .match_query(Matcher::UrlEncoded("status".into(), "watching".into()))
            .with_status(200)
            .with_body(
                json!({
                    "data": [{ "node": { "id": 1, "title": "One", "num_episodes": 12 },
                               "list_status": { "status": "watching", "num_episodes_watched": 3 } }],
                    "paging": { "next": format!("{}/page-2", server.url()) }
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/page-2")
            .with_status(200)
            .with_body(
                json!({
                    "data": [{ "node": { "id": 2, "title": "Two" } }],
                    "paging": {}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let entries = client.list_watching().await.unwrap();
        let ids: Vec<u64> = entries.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(entries[0].watched, 3);
    }

    #[tokio::test]
    async fn test_list_watching_stops_on_repeated_next() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        let first = server
            .mock("GET", "/@me/animelist")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "data": [{ "node": { "id": 1, "title": "One" } }],
                    "paging": { "next": format!("{}/loop", server.url()) }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let looping = server
            .mock("GET", "/loop")
            .with_status(200)
            .with_body(
                json!({
                    "data": [{ "node": { "id": 2, "title": "Two" } }],
                    "paging": { "next": format!("{}/loop", server.url()) }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let entries = tokio::time::timeout(Duration::from_secs(5), client.list_watching())
            .await
            .unwrap()
            .unwrap();

        first.assert_async().await;
        looping.assert_async().await;
        let ids: Vec<u64> = entries.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_list_watching_without_token() {
        let server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);
        client.settings().merge([("access_token", "")]).unwrap();

        assert!(matches!(client.list_watching().await, Err(Error::NoToken)));
    }

    #[tokio::test]
    async fn test_post_status_marks_completed_at_total() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        let watching = server
            .mock("PATCH", "/anime/7/my_list_status")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("num_watched_episodes".into(), "5".into()),
                Matcher::UrlEncoded("status".into(), "watching".into()),
            ]))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let completed = server
            .mock("PATCH", "/anime/8/my_list_status")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("num_watched_episodes".into(), "12".into()),
                Matcher::UrlEncoded("status".into(), "completed".into()),
            ]))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client.post_status(7, 5, 12).await.unwrap();
        client.post_status(8, 13, 12).await.unwrap();

        watching.assert_async().await;
        completed.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_status_surfaces_api_error() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);

        server
            .mock("PATCH", "/anime/7/my_list_status")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let err = client.post_status(7, 1, 12).await.unwrap_err();
        assert_eq!(err.to_string(), "API error (status 400): bad request");
    }

    #[tokio::test]
    async fn test_exchange_code_clears_profile() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &dir);
        client.settings().merge([("id", "old")]).unwrap();
        let pending = PendingAuthorization::new("http://localhost:1/oauth");

        let mock = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("code_verifier".into(), pending.verifier.clone()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","refresh_token":"r","expires_in":10}"#)
            .create_async()
            .await;

        client.exchange_code(&pending, "the-code").await.unwrap();
        mock.assert_async().await;

        let settings = client.settings().clone();
        assert_eq!(settings.get_str("access_token").unwrap(), "fresh");
        assert_eq!(settings.get_str("id").unwrap(), "");
    }
}
