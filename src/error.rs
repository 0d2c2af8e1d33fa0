use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a route or a remote call can produce.
///
/// Handlers never pick a status code themselves: [`Error::status`] is the
/// single place where a failure becomes a page.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Settings Lock is already Locked")]
    Locked,

    #[error("single-shot run complete")]
    SingleShotComplete,

    #[error("missing settings key `{0}`")]
    MissingKey(String),

    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },

    #[error("no access token stored, save a client id and authorize first")]
    NoToken,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("form error: {0}")]
    Form(#[from] serde_urlencoded::de::Error),

    #[error("query error: {0}")]
    Query(#[from] serde_qs::Error),

    #[error("OAuth callback state does not match any pending authorization")]
    InvalidState,

    #[error("authorization failed: {0}")]
    Authorization(String),
}

impl Error {
    pub fn invalid<K: ToString, V: ToString>(key: K, value: V) -> Self {
        Error::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Status code of the page rendered for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Locked | Error::SingleShotComplete => StatusCode::GONE,
            _ => StatusCode::NOT_FOUND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_and_single_shot_are_gone() {
        assert_eq!(Error::Locked.status(), StatusCode::GONE);
        assert_eq!(Error::SingleShotComplete.status(), StatusCode::GONE);
    }

    #[test]
    fn test_everything_else_is_not_found() {
        let errors = [
            Error::NoToken,
            Error::MissingKey("id".into()),
            Error::invalid("total", "abc"),
            Error::Api {
                status: 401,
                message: "invalid_token".into(),
            },
            Error::InvalidState,
        ];
        for error in errors {
            assert_eq!(error.status(), StatusCode::NOT_FOUND, "{error}");
        }
    }

    #[test]
    fn test_api_error_message_carries_body() {
        let error = Error::Api {
            status: 400,
            message: "{\"error\":\"invalid_grant\"}".into(),
        };
        assert!(error.to_string().contains("invalid_grant"));
        assert!(error.to_string().contains("400"));
    }
}
