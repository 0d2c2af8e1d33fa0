use std::collections::BTreeMap;
use std::convert::Infallible;

use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, LOCATION};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;

use super::{pages, App};
use crate::error::{Error, Result};
use crate::mal::auth::AuthCodeResponse;
use crate::mal::WatchEntry;
use crate::{calendar, token, Shared};

type Page = Response<Full<Bytes>>;

const COUNTDOWN_JS: &str = include_str!("../../assets/countdown.js");

/// Per-connection service dispatching requests to the route handlers.
#[derive(Clone)]
pub struct Router {
    app: Shared<App>,
}

impl Router {
    pub fn new(app: Shared<App>) -> Self {
        Self { app }
    }

    /// Route one request whose body has already been collected.
    pub async fn dispatch(&self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> Page {
        let app = self.app.as_ref();
        let result = match (method, path) {
            (&Method::GET, "/settings") => settings_page(app).await,
            (&Method::POST, "/save-settings") => save_settings(app, body).await,
            (&Method::GET, "/") | (&Method::GET, "/force-scheduler") => watch_list(app).await,
            (&Method::POST, "/update-status") => update_status(app, body).await,
            (&Method::GET, "/oauth") => oauth_callback(app, query).await,
            (&Method::GET, "/404") => failed_from_query(query),
            (&Method::GET, path) if path.starts_with("/404/") => {
                let message = &path["/404/".len()..];
                Ok(pages::not_found(&urlencoding::decode(message).unwrap_or_default()))
            }
            (&Method::GET, path) if path.starts_with("/static/") => {
                static_file(app, &path["/static/".len()..]).await
            }
            _ => Ok(pages::not_found(pages::NO_PAGE)),
        };

        result.unwrap_or_else(|err| {
            log::warn!("{method} {path} failed: {err}");
            match err.status() {
                StatusCode::GONE => pages::gone(&err.to_string()),
                _ => pages::not_found(&err.to_string()),
            }
        })
    }
}

impl Service<Request<Incoming>> for Router {
    type Response = Page;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => return Ok(pages::not_found(&err.to_string())),
            };

            log::debug!("{} {}", parts.method, parts.uri);
            Ok(router
                .dispatch(&parts.method, parts.uri.path(), parts.uri.query(), &body)
                .await)
        })
    }
}

fn redirect(to: &str) -> Page {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SEE_OTHER;
    if let Ok(location) = to.parse() {
        response.headers_mut().insert(LOCATION, location);
    }
    response
}

fn file(content_type: &'static str, bytes: Vec<u8>) -> Page {
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    response
}

/// Settings view. Failures while bringing the token up to date are shown on
/// the page instead of replacing it.
async fn settings_page(app: &App) -> Result<Page> {
    let error = match ensure_fresh(app).await {
        Ok(()) => String::new(),
        Err(err) => {
            log::warn!("Settings refresh failed: {err}");
            err.to_string()
        }
    };

    let settings = app.settings().clone();
    let lifetime = settings.lifetime(token::now()).unwrap_or_default();
    Ok(pages::settings(&settings, lifetime, &error))
}

async fn ensure_fresh(app: &App) -> Result<()> {
    let has_profile = !app.settings().get_str("id")?.is_empty();
    if !has_profile {
        app.client().fetch_profile().await?;
    }

    let expired = app.settings().lifetime(token::now())?.expired();
    if expired {
        app.client().refresh_token().await?;
    }
    Ok(())
}

async fn save_settings(app: &App, body: &[u8]) -> Result<Page> {
    let form: BTreeMap<String, String> = serde_urlencoded::from_bytes(body)?;

    // Compared before merging, while the store still holds the old values.
    let (calendar, credentials_changed) = {
        let settings = app.settings();
        let changed = |key: &str| {
            form.get(key)
                .is_some_and(|value| *value != settings.get_str(key).unwrap_or_default())
        };

        let calendar = form
            .get("calendar")
            .filter(|value| changed("calendar") && !value.is_empty())
            .cloned();
        (calendar, changed("CLIENT_ID") || changed("CLIENT_SECRET"))
    };

    if let Some(calendar) = calendar {
        calendar::quick_save(app.client().http(), &app.data_dir, &calendar).await?;
    }

    app.settings().merge(form.clone())?;

    if credentials_changed {
        app.force_oauth()?;
    }

    if form.contains_key("refresh") {
        app.client().refresh().await?;
    }

    Ok(redirect("/settings"))
}

/// Hold back the last entry of a fetched list.
pub fn split_overflow(mut entries: Vec<WatchEntry>) -> (Vec<WatchEntry>, Option<WatchEntry>) {
    let overflow = entries.pop();
    (entries, overflow)
}

async fn watch_list(app: &App) -> Result<Page> {
    let entries = app.client().list_watching().await?;
    let (shown, overflow) = split_overflow(entries);
    Ok(pages::watch_list(&shown, overflow.as_ref()))
}

/// A progress update submitted from the watch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: u64,
    pub progress: u32,
    pub total: u32,
}

impl StatusUpdate {
    /// `None` when the form does not carry a complete update.
    pub fn from_form(form: &BTreeMap<String, String>) -> Result<Option<Self>> {
        let watched = match form.get("watched") {
            Some(watched) if !watched.trim().is_empty() => watched,
            _ => return Ok(None),
        };
        let (Some(id), Some(up_until), Some(total)) =
            (form.get("animes"), form.get("up_until"), form.get("total"))
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            id: id.trim().parse().map_err(|_| Error::invalid("animes", id))?,
            progress: count("up_until", up_until)?.saturating_add(count("watched", watched)?),
            total: count("total", total)?,
        }))
    }
}

fn count(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid(key, value))
}

async fn update_status(app: &App, body: &[u8]) -> Result<Page> {
    let form: BTreeMap<String, String> = serde_urlencoded::from_bytes(body)?;

    if let Some(update) = StatusUpdate::from_form(&form)? {
        app.client()
            .post_status(update.id, update.progress, update.total)
            .await?;
    }

    if app.single_shot {
        log::info!("Single-shot run complete, shutting down");
        app.shutdown().cancel();
        return Err(Error::SingleShotComplete);
    }

    Ok(redirect("/settings"))
}

async fn oauth_callback(app: &App, query: Option<&str>) -> Result<Page> {
    let response: AuthCodeResponse = serde_qs::from_str(query.unwrap_or_default())?;
    if let Some(err) = response.error {
        return Err(Error::Authorization(err));
    }

    let pending = app
        .take_pending(response.state.as_deref())
        .ok_or(Error::InvalidState)?;
    let code = response
        .code
        .ok_or_else(|| Error::Authorization("no code in redirect".to_string()))?;

    app.client().exchange_code(&pending, &code).await?;
    Ok(redirect("/settings"))
}

#[derive(Debug, Default, Deserialize)]
struct Failed {
    failed: Option<String>,
}

fn failed_from_query(query: Option<&str>) -> Result<Page> {
    let failed: Failed = serde_qs::from_str(query.unwrap_or_default())?;
    Ok(pages::not_found(
        failed.failed.as_deref().unwrap_or(pages::NO_PAGE),
    ))
}

async fn static_file(app: &App, name: &str) -> Result<Page> {
    if name == "countdown.js" {
        return Ok(file("text/javascript", COUNTDOWN_JS.as_bytes().to_vec()));
    }

    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Ok(pages::not_found(pages::NO_PAGE));
    }

    let path = app.client().static_dir().join(name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(pages::not_found(pages::NO_PAGE))
        }
        Err(err) => return Err(err.into()),
    };

    let content_type = match path.extension().and_then(|extension| extension.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(file(content_type, bytes))
}
