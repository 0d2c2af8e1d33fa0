use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::settings::Settings;

/// Query parameters MAL appends to the redirect URI.
#[derive(Debug, Deserialize)]
pub struct AuthCodeResponse {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: Option<String>,
}

/// An authorization started in the browser and not yet redeemed.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub verifier: String,
    pub state: Uuid,
    pub redirect_uri: String,
}

impl PendingAuthorization {
    pub fn new<S: Into<String>>(redirect_uri: S) -> Self {
        Self {
            verifier: generate_verifier(),
            state: Uuid::new_v4(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn matches(&self, state: Option<&str>) -> bool {
        state == Some(self.state.to_string().as_str())
    }

    /// MAL only supports the `plain` PKCE method, so the challenge is the
    /// verifier itself.
    pub fn authorize_url(&self, settings: &Settings) -> Result<String> {
        let query = serde_urlencoded::to_string([
            ("response_type", "code".to_string()),
            ("client_id", settings.get_str("CLIENT_ID")?),
            ("code_challenge", self.verifier.clone()),
            ("code_challenge_method", "plain".to_string()),
            ("state", self.state.to_string()),
            ("redirect_uri", self.redirect_uri.clone()),
        ])
        .map_err(|err| crate::Error::Authorization(err.to_string()))?;

        Ok(format!("{}/authorize?{query}", settings.get_str("OAUTH")?))
    }

    pub fn exchange_form(&self, settings: &Settings, code: &str) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("code_verifier", self.verifier.clone()),
            ("redirect_uri", self.redirect_uri.clone()),
            ("client_id", settings.get_str("CLIENT_ID")?),
            ("client_secret", settings.get_str("CLIENT_SECRET")?),
        ])
    }
}

pub fn refresh_form(settings: &Settings) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", settings.get_str("refresh_token")?),
        ("client_id", settings.get_str("CLIENT_ID")?),
        ("client_secret", settings.get_str("CLIENT_SECRET")?),
    ])
}

/// 96 random bytes encode to a 128-character URL-safe verifier, the longest
/// MAL accepts.
fn generate_verifier() -> String {
    let mut bytes = [0u8; 96];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
