//! Identity extraction middleware. Inserts an [`Identity`] into request
//! extensions; missing or invalid credentials yield an anonymous identity.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::auth::{
    decode_basic_credentials, identity_from_token, verify_basic_auth, Identity,
};
use crate::state::AppState;

pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let identity = match header.as_deref() {
        Some(value) if value.starts_with("Bearer ") => {
            identity_from_token(&value["Bearer ".len()..], &state.settings.jwt_secret)
        }
        Some(value) if value.starts_with("Basic ") => {
            basic_identity(&state, &value["Basic ".len()..]).await
        }
        _ => Identity::Anonymous,
    };

    request.extensions_mut().insert(identity);
    next.run(request).await
}

async fn basic_identity(state: &AppState, encoded: &str) -> Identity {
    let Some((username, password)) = decode_basic_credentials(encoded) else {
        warn!("malformed basic auth header, continuing as anonymous");
        return Identity::Anonymous;
    };
    let login_urls = match state.tenant_config() {
        Ok(config) => config.service_config.basic_auth_login_url.clone(),
        Err(err) => {
            warn!("tenant config unavailable for basic auth: {}", err);
            return Identity::Anonymous;
        }
    };
    if login_urls.is_empty() {
        return Identity::Anonymous;
    }
    if verify_basic_auth(&state.client, &login_urls, &username, &password).await {
        Identity::user(username, vec![])
    } else {
        warn!("basic auth rejected for user {}", username);
        Identity::Anonymous
    }
}
