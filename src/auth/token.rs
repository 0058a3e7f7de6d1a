use axum::http::request::Parts;

use super::session::SESSION_COOKIE;

/// Credentials presented with a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <key>`
    ApiKey(String),
    /// Browser session cookie.
    Session(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::Session(_) => f.write_str("Session([REDACTED])"),
        }
    }
}

impl Credentials {
    /// Read credentials from request headers.
    ///
    /// A bearer header wins over a session cookie. A malformed `Authorization`
    /// header is not silently replaced by the cookie.
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        if let Some(header) = parts.headers.get("authorization") {
            return bearer_token(header.to_str().ok()?).map(Self::ApiKey);
        }
        cookie_value(parts, SESSION_COOKIE).map(Self::Session)
    }
}

fn bearer_token(header: &str) -> Option<String> {
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(parts: &Parts, cookie_name: &str) -> Option<String> {
    parts
        .headers
        .get_all("cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name == cookie_name && !value.is_empty()).then(|| value.to_string())
        })
}
