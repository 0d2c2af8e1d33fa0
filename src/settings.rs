use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::token::Lifetime;

lazy_static! {
    static ref DEFAULTS: BTreeMap<&'static str, Value> = BTreeMap::from([
        ("id", json!("")),
        ("name", json!("")),
        ("picture", json!("")),
        ("API", json!("https://api.myanimelist.net/v2/users")),
        ("ANIME_API", json!("https://api.myanimelist.net/v2/anime")),
        ("OAUTH", json!("https://myanimelist.net/v1/oauth2")),
        ("CLIENT_ID", json!("")),
        ("CLIENT_SECRET", json!("")),
        ("access_token", json!("")),
        ("refresh_token", json!("")),
        ("token_type", json!("Bearer")),
        ("expires_in", json!(0)),
        ("now", json!(0)),
        ("calendar", json!("")),
    ]);
}

/// Key/value record backed by a JSON file.
///
/// Every mutation rewrites the whole file.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl Settings {
    /// Load the store from `path`, writing the defaults when the file does
    /// not exist yet. Keys missing from an older file are filled in from the
    /// defaults; keys already on disk are kept as they are.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut values: BTreeMap<String, Value> = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        let mut filled = false;
        for (key, value) in DEFAULTS.iter() {
            if !values.contains_key(*key) {
                values.insert(key.to_string(), value.clone());
                filled = true;
            }
        }

        let settings = Self { path, values };
        if filled {
            log::debug!("Writing default settings to {}", settings.path.display());
            settings.save()?;
        }
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    /// String form of a value; numbers are rendered, `null` is empty.
    pub fn get_str(&self, key: &str) -> Result<String> {
        Ok(match self.get(key)? {
            Value::String(value) => value.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Integer form of a value. Form submissions store numbers as strings,
    /// so numeric strings are accepted and an empty string reads as zero.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        let value = self.get(key)?;
        let parsed = match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64)),
            Value::String(raw) if raw.trim().is_empty() => Some(0),
            Value::String(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| raw.trim().parse::<f64>().ok().map(|float| float as i64)),
            _ => None,
        };
        parsed.ok_or_else(|| Error::invalid(key, value))
    }

    /// Overwrite or add the given keys, then persist the whole store.
    /// Keys not named in `fields` are left untouched.
    pub fn merge<I, K, V>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.values
            .extend(fields.into_iter().map(|(key, value)| (key.into(), value.into())));
        self.save()
    }

    fn save(&self) -> Result<()> {
        persist(&self.path, serde_json::to_string_pretty(&self.values)?.as_bytes())
    }

    /// Authorization header for the stored access token.
    pub fn headers(&self) -> Result<HeaderMap> {
        let value = format!(
            "{} {}",
            self.get_str("token_type")?,
            self.get_str("access_token")?
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|_| Error::invalid("access_token", "<redacted>"))?,
        );
        Ok(headers)
    }

    pub fn has_token(&self) -> bool {
        self.get_str("access_token")
            .map(|token| !token.is_empty())
            .unwrap_or(false)
    }

    pub fn lifetime(&self, now: i64) -> Result<Lifetime> {
        Ok(Lifetime::new(
            self.get_i64("now")?,
            self.get_i64("expires_in")?,
            now,
        ))
    }
}

/// Write `contents` to a sibling temp file and rename it over `path`, so a
/// crash leaves either the old file or the new one.
pub(crate) fn persist(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    let temp = path.with_file_name(name);
    {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp, path)?;
    Ok(())
}
