//! Identity resolution: optional JWT bearer tokens and basic auth.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// JWT claims carried by bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Resolved request identity. Credentials are optional everywhere; public
/// layers must stay reachable without them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    User {
        username: String,
        groups: Vec<String>,
    },
}

impl Identity {
    pub fn user(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self::User {
            username: username.into(),
            groups,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { username, .. } => Some(username),
        }
    }

    pub fn groups(&self) -> &[String] {
        match self {
            Self::Anonymous => &[],
            Self::User { groups, .. } => groups,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

/// Decode a bearer token into an identity. Invalid tokens are treated as
/// anonymous, not rejected.
pub fn identity_from_token(token: &str, secret: &str) -> Identity {
    let key = DecodingKey::from_secret(secret.as_bytes());
    match decode::<Claims>(token, &key, &Validation::default()) {
        Ok(data) => Identity::user(data.claims.sub, data.claims.groups),
        Err(err) => {
            warn!("invalid bearer token, continuing as anonymous: {}", err);
            Identity::Anonymous
        }
    }
}

/// Split a basic auth header value into username and password.
pub fn decode_basic_credentials(encoded: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Verify basic auth credentials against the configured login endpoints.
/// Any endpoint accepting the credentials authenticates the username.
pub async fn verify_basic_auth(
    client: &reqwest::Client,
    login_urls: &[String],
    username: &str,
    password: &str,
) -> bool {
    for url in login_urls {
        let result = client
            .post(url)
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => return true,
            Ok(_) => {}
            Err(err) => warn!("basic auth endpoint {} unreachable: {}", url, err),
        }
    }
    false
}
