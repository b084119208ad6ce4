//! WMS/WFS dispatcher: validate, rewrite, forward, filter.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use tracing::error;

use crate::auth::Identity;
use crate::backend::{self, RawBody};
use crate::catalog::TenantConfig;
use crate::config::Settings;
use crate::error::OwsException;
use crate::ogc::{normalize_params, Params, Protocol, WfsVerb, WmsVerb};
use crate::permissions::{WfsPermissionSet, WmsPermissionSet};
use crate::state::AppState;
use crate::{wfs, wms};

pub async fn handle_get(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    RawQuery(query): RawQuery,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Response {
    let params = normalize_params(query_pairs(query.as_deref()));
    match dispatch(&state, &service_name, Method::GET, params, None, &identity, &headers).await {
        Ok(response) => response,
        Err(exception) => exception.into_response(),
    }
}

pub async fn handle_post(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    RawQuery(query): RawQuery,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // form bodies merge into the parameter map, query string winning on
    // conflicts; any other content type is carried as the raw payload
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut raw_body = None;
    if content_type.starts_with("application/x-www-form-urlencoded") {
        pairs.extend(
            url::form_urlencoded::parse(&body)
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    } else if !body.is_empty() {
        raw_body = Some(RawBody { content_type, body });
    }
    pairs.extend(query_pairs(query.as_deref()));
    let params = normalize_params(pairs);

    match dispatch(&state, &service_name, Method::POST, params, raw_body, &identity, &headers)
        .await
    {
        Ok(response) => response,
        Err(exception) => exception.into_response(),
    }
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Request origin: the Origin header when present, otherwise reconstructed
/// from the forwarding proxy headers.
fn request_origin(headers: &HeaderMap) -> String {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return origin.to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", proto, host)
}

/// Mountpoint prefix with a leading slash, empty when serving at the root.
pub fn script_root(settings: &Settings) -> String {
    let mountpoint = settings.service_mountpoint.trim_matches('/');
    if mountpoint.is_empty() {
        String::new()
    } else {
        format!("/{}", mountpoint)
    }
}

fn filter_failure(err: impl std::fmt::Display) -> OwsException {
    error!("failed to filter backend response: {}", err);
    OwsException::backend_error(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
}

async fn dispatch(
    state: &AppState,
    service_name: &str,
    method: Method,
    mut params: Params,
    raw_body: Option<RawBody>,
    identity: &Identity,
    headers: &HeaderMap,
) -> Result<Response, OwsException> {
    let config = state.tenant_config().map_err(|err| {
        error!("tenant configuration unavailable: {}", err);
        OwsException::backend_error(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
    })?;

    // never trust a client-supplied identity parameter
    if let Some(parameter) = &config.service_config.qgis_server_identity_parameter {
        let parameter = parameter.to_uppercase();
        params.remove(&parameter);
        if let Some(username) = identity.username() {
            params.insert(parameter, username.to_string());
        }
    }

    let protocol = params
        .get("SERVICE")
        .and_then(|service| Protocol::from_service(service))
        .ok_or_else(OwsException::service_unknown)?;

    match protocol {
        Protocol::Wms => {
            handle_wms(state, &config, service_name, method, params, identity, headers).await
        }
        Protocol::Wfs => {
            handle_wfs(state, &config, service_name, method, params, raw_body, identity, headers)
                .await
        }
    }
}

async fn handle_wms(
    state: &AppState,
    config: &TenantConfig,
    service_name: &str,
    method: Method,
    mut params: Params,
    identity: &Identity,
    headers: &HeaderMap,
) -> Result<Response, OwsException> {
    let resources = config
        .wms_services
        .get(service_name)
        .ok_or_else(OwsException::service_unknown)?;
    let grants = config.permissions.wms_grants(identity, service_name);
    let permissions = WmsPermissionSet::resolve(resources, &grants)
        .ok_or_else(OwsException::service_unknown)?;

    let request = params.get("REQUEST").cloned().unwrap_or_default();
    let verb = WmsVerb::parse(&request)
        .ok_or_else(|| OwsException::operation_not_supported(&request))?;

    wms::validate_request(verb, &params, &permissions)?;

    let origin = request_origin(headers);
    let script_root = script_root(&state.settings);
    let ctx = wms::WmsRequestContext {
        permissions: &permissions,
        service_config: &config.service_config,
        permissions_doc: &config.permissions,
        identity,
        tenant: &config.tenant,
        origin: &origin,
        mountpoint: &script_root,
    };
    let adjustment = wms::adjust_request(verb, &mut params, &ctx)?;

    // raster exports and prints go through any custom print endpoint
    let raster_export = verb == WmsVerb::GetMap
        && params.get("FILENAME").map_or(false, |f| !f.is_empty());
    let url = if (verb == WmsVerb::GetPrint || raster_export)
        && !permissions.print_url.is_empty()
    {
        permissions.print_url.clone()
    } else {
        permissions.ogc_url.clone()
    };

    let method = if adjustment.force_post {
        Method::POST
    } else {
        method
    };
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let timeout = Duration::from_secs_f64(config.service_config.network_timeout);
    let response =
        backend::forward(&state.client, &method, &url, &params, None, host, timeout).await?;

    if verb.streamable() {
        let filename = params.get("FILENAME").cloned();
        return backend::stream(response, filename.as_deref()).await;
    }

    let buffered = backend::buffered(response).await?;
    match verb {
        WmsVerb::GetCapabilities | WmsVerb::GetProjectSettings => {
            let filtered = wms::capabilities::filter_capabilities(
                &buffered.text(),
                &permissions,
                &origin,
                &script_root,
            )
            .map_err(filter_failure)?;
            Ok((
                buffered.status,
                [(header::CONTENT_TYPE, buffered.content_type)],
                filtered,
            )
                .into_response())
        }
        WmsVerb::GetFeatureInfo => {
            let requested_format = adjustment
                .requested_info_format
                .unwrap_or_else(|| "text/xml".to_string());
            let filtered = wms::feature_info::filter_feature_info(
                &buffered.text(),
                &requested_format,
                &permissions,
            )
            .map_err(filter_failure)?;
            Ok((
                buffered.status,
                [(header::CONTENT_TYPE, filtered.content_type)],
                filtered.body,
            )
                .into_response())
        }
        WmsVerb::GetTranslations => {
            let filtered = wms::translations::filter_translations(&buffered.text(), &permissions);
            Ok((buffered.status, Json(filtered)).into_response())
        }
        _ => Ok((
            buffered.status,
            [(header::CONTENT_TYPE, buffered.content_type)],
            buffered.body,
        )
            .into_response()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_wfs(
    state: &AppState,
    config: &TenantConfig,
    service_name: &str,
    method: Method,
    mut params: Params,
    raw_body: Option<RawBody>,
    identity: &Identity,
    headers: &HeaderMap,
) -> Result<Response, OwsException> {
    let resources = config
        .wfs_services
        .get(service_name)
        .ok_or_else(OwsException::service_unknown)?;
    let grants = config.permissions.wfs_grants(identity, service_name);
    let permissions = WfsPermissionSet::resolve(resources, &grants)
        .ok_or_else(OwsException::service_unknown)?;

    let request = params.get("REQUEST").cloned().unwrap_or_default();
    let verb = WfsVerb::parse(&request)
        .ok_or_else(|| OwsException::operation_not_supported(&request))?;

    wfs::validate_request(&params, &permissions)?;
    wfs::adjust_request(verb, &mut params);

    // transaction bodies are filtered before they reach the backend
    let raw_body = match (verb, raw_body) {
        (WfsVerb::Transaction, Some(raw)) => {
            let body = String::from_utf8_lossy(&raw.body).into_owned();
            let filtered = wfs::transaction::filter_transaction(&body, &permissions)?;
            Some(RawBody {
                content_type: raw.content_type,
                body: Bytes::from(filtered),
            })
        }
        (_, raw) => raw,
    };

    let origin = request_origin(headers);
    let script_root = script_root(&state.settings);
    let service_url = permissions.online_resource.clone().unwrap_or_else(|| {
        format!("{}{}/ows/{}", origin, script_root, service_name)
    });

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let timeout = Duration::from_secs_f64(config.service_config.network_timeout);
    let response = backend::forward(
        &state.client,
        &method,
        &permissions.ogc_url,
        &params,
        raw_body.as_ref(),
        host,
        timeout,
    )
    .await?;

    if verb.streamable() {
        return backend::stream(response, None).await;
    }

    let buffered = backend::buffered(response).await?;
    let filtered = match verb {
        WfsVerb::GetCapabilities => {
            let version = params.get("VERSION").map(String::as_str).unwrap_or("1.1.0");
            wfs::capabilities::filter_capabilities(
                &buffered.text(),
                version,
                &service_url,
                &permissions,
            )
            .map_err(filter_failure)?
        }
        WfsVerb::DescribeFeatureType => {
            wfs::describe_feature_type::filter_describe_feature_type(
                &buffered.text(),
                &permissions,
            )
            .map_err(filter_failure)?
        }
        WfsVerb::GetFeature => {
            if params.get("OUTPUTFORMAT").map(String::as_str) == Some("geojson") {
                let filtered = wfs::get_feature::filter_geojson(&buffered.text(), &permissions)
                    .map_err(filter_failure)?;
                return Ok((
                    buffered.status,
                    [(header::CONTENT_TYPE, "application/json".to_string())],
                    filtered,
                )
                    .into_response());
            }
            wfs::get_feature::filter_gml(
                &buffered.text(),
                &permissions.ogc_url,
                &service_url,
                &permissions,
            )
            .map_err(filter_failure)?
        }
        // transactions were already streamed back above
        WfsVerb::Transaction => buffered.text(),
    };

    Ok((
        buffered.status,
        [(header::CONTENT_TYPE, buffered.content_type)],
        filtered,
    )
        .into_response())
}
