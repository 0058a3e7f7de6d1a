//! Request scenarios against a router, without starting a server.
//!
//! ```rust,ignore
//! use plangate::testing;
//!
//! let body: serde_json::Value = testing::get(app.router(), "/api/usage")
//!     .with_api_key(&issued.key)
//!     .execute()
//!     .await
//!     .assert_ok()
//!     .json()
//!     .await;
//! ```

use axum::{
    Router,
    body::Body,
    http::{HeaderName, Method, Request, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;

use crate::auth::SESSION_COOKIE;

/// A single request being built against a router.
pub struct Scenario {
    app: Router,
    request: Request<Body>,
}

impl Scenario {
    pub fn new(app: Router, method: Method, uri: &str) -> Self {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        Self { app, request }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
        self.request.headers_mut().insert(name, value.parse().unwrap());
        self
    }

    /// Authenticate with an API key as a bearer token.
    pub fn with_api_key(self, key: &str) -> Self {
        self.header("Authorization", &format!("Bearer {}", key))
    }

    /// Authenticate with a browser session cookie.
    pub fn with_session(self, token: &str) -> Self {
        self.header("Cookie", &format!("{}={}", SESSION_COOKIE, token))
    }

    /// Append query parameters, percent-encoded.
    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        let encoded = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)));
        let query: Vec<String> = self
            .request
            .uri()
            .query()
            .map(str::to_string)
            .into_iter()
            .chain(encoded)
            .collect();

        let path = self.request.uri().path().to_string();
        let uri = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query.join("&"))
        };
        *self.request.uri_mut() = uri.parse().unwrap();
        self
    }

    pub fn json_body<T: Serialize>(self, body: &T) -> Self {
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
            .raw_body(serde_json::to_vec(body).unwrap())
    }

    /// Send exact bytes, e.g. a signed webhook payload.
    pub fn raw_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        *self.request.body_mut() = Body::from(body.into());
        self
    }

    pub async fn execute(self) -> ScenarioAssert {
        let response = self.app.oneshot(self.request).await.unwrap();
        ScenarioAssert { response }
    }
}

/// Assertions on a scenario's response.
pub struct ScenarioAssert {
    response: Response,
}

impl ScenarioAssert {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn assert_status(self, expected: StatusCode) -> Self {
        let actual = self.response.status();
        assert_eq!(actual, expected, "Expected status {}, got {}", expected, actual);
        self
    }

    pub fn assert_ok(self) -> Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn assert_created(self) -> Self {
        self.assert_status(StatusCode::CREATED)
    }

    pub fn assert_bad_request(self) -> Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    pub fn assert_unauthorized(self) -> Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(self) -> Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    pub fn assert_not_found(self) -> Self {
        self.assert_status(StatusCode::NOT_FOUND)
    }

    pub fn assert_too_many_requests(self) -> Self {
        self.assert_status(StatusCode::TOO_MANY_REQUESTS)
    }

    async fn into_bytes(self) -> axum::body::Bytes {
        axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    pub async fn json<T: for<'de> Deserialize<'de>>(self) -> T {
        let bytes = self.into_bytes().await;
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            panic!("Response is not the expected JSON ({}): {}", e, String::from_utf8_lossy(&bytes))
        })
    }

    /// Assert the error body carries `code`, and return the body.
    pub async fn assert_error_code(self, code: &str) -> serde_json::Value {
        let body: serde_json::Value = self.json().await;
        assert_eq!(body["code"], code, "Unexpected error body: {}", body);
        assert!(body["error_id"].is_string(), "Missing error_id: {}", body);
        body
    }

    /// Assert a dotted JSON path (`"images.used"`) equals `expected`.
    ///
    /// The body is kept so assertions can be chained.
    pub async fn assert_json_path(self, path: &str, expected: serde_json::Value) -> Self {
        let (parts, body) = self.response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let actual = json_path_get(&json, path)
            .unwrap_or_else(|| panic!("Path '{}' not found in {}", path, json));
        assert_eq!(actual, &expected, "JSON path '{}' value mismatch", path);

        Self {
            response: Response::from_parts(parts, Body::from(bytes)),
        }
    }

    /// The raw response, for header checks.
    pub fn response(self) -> Response {
        self.response
    }
}

fn json_path_get<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(json, |current, part| match part.parse::<usize>() {
        Ok(index) => current.get(index),
        Err(_) => current.get(part),
    })
}

pub fn get(app: Router, uri: &str) -> Scenario {
    Scenario::new(app, Method::GET, uri)
}

pub fn post(app: Router, uri: &str) -> Scenario {
    Scenario::new(app, Method::POST, uri)
}

pub fn delete(app: Router, uri: &str) -> Scenario {
    Scenario::new(app, Method::DELETE, uri)
}
