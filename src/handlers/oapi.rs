//! OGC API Features dispatcher.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde_json::Value;
use tracing::error;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::oapi::{self, OapiContext};
use crate::ogc::Params;
use crate::permissions::WfsPermissionSet;
use crate::state::AppState;

use super::ows::script_root;

/// `/api/:service/features` without a sub-path: the landing page.
pub async fn handle_root(
    state: State<AppState>,
    Path(service_name): Path<String>,
    method: Method,
    query: RawQuery,
    identity: Extension<Identity>,
    body: Bytes,
) -> Response {
    handle_api(state, service_name, String::new(), method, query, identity, body).await
}

pub async fn handle(
    state: State<AppState>,
    Path((service_name, api_path)): Path<(String, String)>,
    method: Method,
    query: RawQuery,
    identity: Extension<Identity>,
    body: Bytes,
) -> Response {
    handle_api(state, service_name, api_path, method, query, identity, body).await
}

async fn handle_api(
    State(state): State<AppState>,
    service_name: String,
    api_path: String,
    method: Method,
    RawQuery(query): RawQuery,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Response {
    match dispatch(&state, &service_name, &api_path, &method, query.as_deref(), &identity, &body)
        .await
    {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch(
    state: &AppState,
    service_name: &str,
    api_path: &str,
    method: &Method,
    query: Option<&str>,
    identity: &Identity,
    body: &Bytes,
) -> Result<Response, ApiError> {
    let config = state.tenant_config().map_err(|err| {
        error!("tenant configuration unavailable: {}", err);
        ApiError::bad_gateway("tenant configuration unavailable")
    })?;

    let resources = config
        .wfs_services
        .get(service_name)
        .ok_or_else(|| ApiError::service_not_found(service_name))?;
    let grants = config.permissions.wfs_grants(identity, service_name);
    let permissions = WfsPermissionSet::resolve(resources, &grants)
        .ok_or_else(|| ApiError::service_not_found(service_name))?;

    let (api_path, format_ext) = oapi::split_format(&oapi::normalize_path(api_path));
    let route = oapi::match_route(&api_path, method)?;

    let mut data = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {}", err)))?
    };
    oapi::filter_request(route, method, &api_path, &permissions, &mut data)?;

    // query parameters pass through to the backend unchanged
    let params: Params = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let ctx = OapiContext::new(
        &permissions,
        identity,
        &config.service_config,
        &script_root(&state.settings),
        &api_path,
        &format_ext,
        state.settings.auth_service_url.clone(),
    );

    let response = oapi::forward(
        &state.client,
        &config.service_config,
        service_name,
        method,
        &api_path,
        &params,
        &data,
    )
    .await?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    if status == StatusCode::CREATED {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let location = oapi::created_location(location, &ctx);
        return Ok((StatusCode::CREATED, [(header::LOCATION, location)], "").into_response());
    }
    if status == StatusCode::OK && *method == Method::DELETE {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut payload: Value = response.json().await.map_err(|err| {
        error!("invalid JSON from backend: {}", err);
        ApiError::bad_gateway("invalid backend response")
    })?;

    if status.as_u16() >= 400 {
        return Ok((status, Json(payload)).into_response());
    }

    oapi::shape_response(route, &mut payload, &ctx, &params);
    Ok((status, Json(payload)).into_response())
}
