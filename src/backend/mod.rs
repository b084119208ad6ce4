//! HTTP client for the map server behind the proxy.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tracing::{error, info};

use crate::error::OwsException;
use crate::ogc::Params;

/// A fully buffered backend reply, for responses that get filtered.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Raw POST payload with its content type, e.g. a WFS Transaction body.
#[derive(Debug, Clone)]
pub struct RawBody {
    pub content_type: String,
    pub body: Bytes,
}

/// Forward an OWS request to the backend. GET sends the parameters as the
/// query string, POST as a form unless a raw body is given (the raw body
/// keeps the parameters on the query string).
pub async fn forward(
    client: &reqwest::Client,
    method: &Method,
    url: &str,
    params: &Params,
    raw_body: Option<&RawBody>,
    host: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Response, OwsException> {
    let pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut request = if *method == Method::POST {
        info!("forward POST request to {}", url);
        match raw_body {
            Some(raw) => client
                .post(url)
                .query(&pairs)
                .header(header::CONTENT_TYPE, &raw.content_type)
                .body(raw.body.clone()),
            None => client.post(url).form(&pairs),
        }
    } else {
        info!("forward GET request to {}", url);
        client.get(url).query(&pairs)
    };
    if let Some(host) = host {
        // the backend derives its advertised URLs from this
        request = request.header(header::HOST, host);
    }

    request.timeout(timeout).send().await.map_err(|err| {
        error!("backend request to {} failed: {}", url, err);
        OwsException::backend_error(StatusCode::BAD_GATEWAY.as_u16())
    })
}

/// Buffer a backend reply, mapping non-success statuses to the generic
/// exception document. The backend body is logged, never echoed.
pub async fn buffered(response: reqwest::Response) -> Result<BackendResponse, OwsException> {
    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = response.bytes().await.map_err(|err| {
        error!("failed to read backend response: {}", err);
        OwsException::backend_error(StatusCode::BAD_GATEWAY.as_u16())
    })?;

    if !status.is_success() {
        error!(
            "backend returned {}:\n{}",
            status,
            String::from_utf8_lossy(&body)
        );
        return Err(OwsException::backend_error(status.as_u16()));
    }

    Ok(BackendResponse {
        status,
        content_type,
        body,
    })
}

/// Pipe an unfiltered backend reply to the client incrementally. A non-2xx
/// status still becomes the generic exception document.
pub async fn stream(
    response: reqwest::Response,
    attachment_filename: Option<&str>,
) -> Result<Response, OwsException> {
    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("backend returned {}:\n{}", status, body);
        return Err(OwsException::backend_error(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(filename) = attachment_filename {
        if let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename={}", filename))
        {
            builder = builder.header(header::CONTENT_DISPOSITION, value);
        }
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|err| {
            error!("failed to build streamed response: {}", err);
            OwsException::backend_error(StatusCode::BAD_GATEWAY.as_u16())
        })
}
