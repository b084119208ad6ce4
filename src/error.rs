// HTTP boundary error types for both protocol families.
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

/// OGC API Features error with the JSON error-array body expected by clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    /// Unknown service id
    ServiceNotFound(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    /// Unknown endpoint/method combination
    EndpointNotFound { path: String, method: String },
    /// Unknown or unpermitted collection
    CollectionNotFound(String),

    // 502 Bad Gateway (backend issues)
    BadGateway(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ServiceNotFound(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::EndpointNotFound { .. } => 404,
            ApiError::CollectionNotFound(_) => 404,
            ApiError::BadGateway(_) => 502,
        }
    }

    /// Get wire-format error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "Bad request error",
            ApiError::ServiceNotFound(_) => "API not found error",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::EndpointNotFound { .. } => "Bad request error",
            ApiError::CollectionNotFound(_) => "API not found error",
            ApiError::BadGateway(_) => "Internal server error",
        }
    }

    /// Get client-safe error description
    pub fn description(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::ServiceNotFound(name) => {
                format!("Service with given id ({}) was not found", name)
            }
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::EndpointNotFound { path, method } => {
                format!("Endpoint {} for method {} does not exist", path, method)
            }
            ApiError::CollectionNotFound(name) => format!(
                "Collection with given id ({}) was not found, not permitted, \
                 or multiple matches were found",
                name
            ),
            ApiError::BadGateway(msg) => msg.clone(),
        }
    }

    /// Convert to the JSON error-array response body
    pub fn to_json(&self) -> Value {
        json!([{
            "code": self.code(),
            "description": self.description()
        }])
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn service_not_found(service_name: impl Into<String>) -> Self {
        ApiError::ServiceNotFound(service_name.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn collection_not_found(layer_name: impl Into<String>) -> Self {
        ApiError::CollectionNotFound(layer_name.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

/// WMS/WFS exception surfaced as a `<ServiceExceptionReport>` document.
///
/// Validation and permission failures carry HTTP 200 since legacy OGC clients
/// only parse the XML body; wrapped backend failures keep the backend status.
#[derive(Debug, Clone, PartialEq)]
pub struct OwsException {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl OwsException {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: 200,
        }
    }

    /// Exception for an unknown or unpermitted service
    pub fn service_unknown() -> Self {
        Self::new(
            "Service configuration error",
            "Service unknown or unsupported",
        )
    }

    /// Exception for an unsupported REQUEST value
    pub fn operation_not_supported(request: &str) -> Self {
        Self::new(
            "OperationNotSupported",
            format!("Request {} is not supported", request),
        )
    }

    /// Invalid request input surfaced with HTTP 400, e.g. bad MARKER values
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "InvalidParameterValue".to_string(),
            message: message.into(),
            status: 400,
        }
    }

    /// Wrapped backend failure; never echoes the backend body
    pub fn backend_error(status: u16) -> Self {
        Self {
            code: "UnknownError".to_string(),
            message: "The server encountered an internal error or misconfiguration \
                      and was unable to complete your request."
                .to_string(),
            status,
        }
    }

    /// Render the ServiceExceptionReport document
    pub fn to_xml(&self) -> String {
        format!(
            "<ServiceExceptionReport version=\"1.3.0\">\n \
             <ServiceException code=\"{}\">{}</ServiceException>\n\
             </ServiceExceptionReport>",
            xml_escape(&self.code),
            xml_escape(&self.message)
        )
    }
}

impl std::fmt::Display for OwsException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for OwsException {}

impl IntoResponse for OwsException {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (
            status,
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            self.to_xml(),
        )
            .into_response()
    }
}

/// Escape text for use in XML content and attribute values
pub fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_exception_report_format() {
        let exception = OwsException::new("LayerNotDefined", "Layer \"a\" does not exist");
        assert_eq!(
            exception.to_xml(),
            "<ServiceExceptionReport version=\"1.3.0\">\n \
             <ServiceException code=\"LayerNotDefined\">Layer &quot;a&quot; does not exist</ServiceException>\n\
             </ServiceExceptionReport>"
        );
        assert_eq!(exception.status, 200);
    }

    #[test]
    fn api_error_body_is_error_array() {
        let err = ApiError::collection_not_found("points");
        assert_eq!(err.status_code(), 404);
        let body = err.to_json();
        assert_eq!(body[0]["code"], "API not found error");
        assert!(body[0]["description"]
            .as_str()
            .unwrap()
            .contains("(points)"));
    }
}
