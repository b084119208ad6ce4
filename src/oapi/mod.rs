//! OGC API Features permission filter.
//!
//! Requests are matched against a fixed route table, checked against the
//! merged WFS permission set, forwarded to the backend as JSON, and the
//! response documents are rewritten so clients only ever see public URLs and
//! permitted collections/attributes.

pub mod links;

use std::time::Duration;

use axum::http::Method;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::auth::Identity;
use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::ogc::names::{clean_attribute_name, clean_layer_name};
use crate::ogc::Params;
use crate::permissions::wfs::{WfsLayerPermission, WfsPermissionSet};

/// Supported endpoint shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    LandingPage,
    ApiDescription,
    Conformance,
    Collections,
    Collection,
    Items,
    Item,
}

/// Normalize an API path: no trailing slash, a leading slash unless empty.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Split a trailing format extension off an API path.
pub fn split_format(path: &str) -> (String, String) {
    for ext in ["json", "geojson", "html"] {
        if let Some(stripped) = path.strip_suffix(&format!(".{}", ext)) {
            return (stripped.to_string(), ext.to_string());
        }
    }
    (path.to_string(), String::new())
}

/// Match a normalized API path and method against the route table.
pub fn match_route(path: &str, method: &Method) -> Result<Route, ApiError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let route = match segments.as_slice() {
        [] => (*method == Method::GET).then_some(Route::LandingPage),
        ["api"] => (*method == Method::GET).then_some(Route::ApiDescription),
        ["conformance"] => (*method == Method::GET).then_some(Route::Conformance),
        ["collections"] => (*method == Method::GET).then_some(Route::Collections),
        ["collections", _] => (*method == Method::GET).then_some(Route::Collection),
        ["collections", _, "items"] => {
            matches!(*method, Method::GET | Method::POST).then_some(Route::Items)
        }
        ["collections", _, "items", _] => matches!(
            *method,
            Method::GET | Method::PUT | Method::PATCH | Method::DELETE
        )
        .then_some(Route::Item),
        _ => None,
    };
    route.ok_or_else(|| ApiError::EndpointNotFound {
        path: path.to_string(),
        method: method.to_string(),
    })
}

/// Cleaned collection id from a normalized `/collections/...` path.
pub fn collection_id(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["collections", id, ..] => Some(clean_layer_name(id)),
        _ => None,
    }
}

/// Request-scoped context shared by the filtering and link-rewriting steps.
pub struct OapiContext<'a> {
    pub permissions: &'a WfsPermissionSet,
    pub identity: &'a Identity,
    /// Normalized API path of the current request.
    pub api_path: String,
    /// Public path of the service's API root.
    pub public_root: String,
    /// Public path of the service's OWS endpoint.
    pub ogc_public_path: String,
    /// Backend OGC API Features root, without a trailing slash.
    pub oapi_backend_url: String,
    /// Backend origin with the path stripped.
    pub root_backend_url: String,
    pub oapif_max_limit: u64,
    /// Auth service base path, when login/logout links are wanted.
    pub auth_path: Option<String>,
    pub html_format: bool,
}

impl<'a> OapiContext<'a> {
    pub fn new(
        permissions: &'a WfsPermissionSet,
        identity: &'a Identity,
        config: &ServiceConfig,
        script_root: &str,
        api_path: &str,
        format_ext: &str,
        auth_path: Option<String>,
    ) -> Self {
        let oapi_backend_url = config.oapi_server_base();
        let root_backend_url = url::Url::parse(&oapi_backend_url)
            .ok()
            .map(|url| format!("{}://{}", url.scheme(), url.authority()))
            .unwrap_or_default();
        Self {
            permissions,
            identity,
            api_path: normalize_path(api_path),
            public_root: format!("{}/api/{}/features", script_root, permissions.service_name),
            ogc_public_path: format!("{}/ows/{}", script_root, permissions.service_name),
            oapi_backend_url,
            root_backend_url,
            oapif_max_limit: config.oapif_max_limit,
            auth_path,
            html_format: matches!(format_ext, "" | "html"),
        }
    }

    /// Public URL path for an API sub-path.
    pub fn public_path(&self, api_path: &str) -> String {
        links::public_path(&self.public_root, api_path)
    }

    /// Public URL path of the current request.
    pub fn current_url(&self) -> String {
        self.public_path(&self.api_path)
    }

    fn rewriter(&self) -> links::LinkRewriter<'_> {
        links::LinkRewriter {
            oapi_backend_url: &self.oapi_backend_url,
            root_backend_url: &self.root_backend_url,
            public_root: &self.public_root,
            ogc_public_path: &self.ogc_public_path,
            html_format: self.html_format,
        }
    }
}

fn collection_not_found(id: &str) -> ApiError {
    ApiError::collection_not_found(id.to_string())
}

/// Validate a request against the permission set and filter write payloads
/// in place. Write payload keys the identity is not granted are silently
/// dropped; missing write capability on the layer is a hard error.
pub fn filter_request(
    route: Route,
    method: &Method,
    path: &str,
    permissions: &WfsPermissionSet,
    data: &mut Value,
) -> Result<(), ApiError> {
    let id = match route {
        Route::Collection | Route::Items | Route::Item => {
            collection_id(path).unwrap_or_default()
        }
        _ => return Ok(()),
    };
    let layer = permissions
        .layer(&id)
        .ok_or_else(|| collection_not_found(&id))?;

    match route {
        Route::Collection => {
            if !layer.readable {
                return Err(collection_not_found(&id));
            }
        }
        Route::Items => match *method {
            Method::GET => {
                if !layer.readable {
                    return Err(collection_not_found(&id));
                }
            }
            Method::POST => {
                if !(layer.writable && layer.creatable) {
                    return Err(ApiError::forbidden(format!(
                        "Features cannot be added to layer '{}'",
                        id
                    )));
                }
                filter_payload_object(data, "properties", layer);
            }
            _ => {}
        },
        Route::Item => match *method {
            Method::GET => {
                if !layer.readable {
                    return Err(collection_not_found(&id));
                }
            }
            Method::PATCH => {
                if !(layer.writable && layer.updatable) {
                    return Err(ApiError::forbidden(format!(
                        "Features in layer '{}' cannot be changed",
                        id
                    )));
                }
                filter_payload_object(data, "modify", layer);
            }
            Method::PUT => {
                if !(layer.writable && layer.updatable) {
                    return Err(ApiError::forbidden(format!(
                        "Features in layer '{}' cannot be changed",
                        id
                    )));
                }
                filter_payload_object(data, "properties", layer);
            }
            Method::DELETE => {
                if !(layer.writable && layer.deletable) {
                    return Err(ApiError::forbidden(format!(
                        "Features in layer '{}' cannot be deleted",
                        id
                    )));
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

/// The backend expects attribute names, not aliases, on write payloads.
fn filter_payload_object(data: &mut Value, key: &str, layer: &WfsLayerPermission) {
    let permitted = layer.cleaned_attributes();
    if let Some(Value::Object(object)) = data.get_mut(key) {
        object.retain(|name, _| permitted.contains(&clean_attribute_name(name)));
    }
}

/// Feature properties report display aliases; resolve them back to cleaned
/// attribute names before checking them against the permitted set.
fn filter_feature_properties(properties: &mut Map<String, Value>, layer: &WfsLayerPermission) {
    let permitted = layer.cleaned_attributes();
    properties.retain(|key, _| {
        let name = layer
            .name_for_alias(key)
            .unwrap_or_else(|| key.to_string());
        permitted.contains(&name)
    });
}

/// Forward a request to the backend's OGC API Features endpoint.
pub async fn forward(
    client: &reqwest::Client,
    config: &ServiceConfig,
    service_name: &str,
    method: &Method,
    api_path: &str,
    params: &Params,
    data: &Value,
) -> Result<reqwest::Response, ApiError> {
    let url = format!("{}{}.json", config.oapi_server_base(), api_path);
    let project = format!("{}{}", config.qgis_server_url_tenant_suffix, service_name);
    debug!("forwarding {} request to {}", method, url);

    let pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let request = match *method {
        Method::GET => client.get(&url).query(&pairs),
        Method::POST => client.post(&url).query(&pairs).json(data),
        Method::PUT => client.put(&url).query(&pairs).json(data),
        Method::PATCH => client.patch(&url).query(&pairs).json(data),
        Method::DELETE => client.delete(&url).query(&pairs).json(data),
        _ => {
            return Err(ApiError::EndpointNotFound {
                path: api_path.to_string(),
                method: method.to_string(),
            })
        }
    };

    request
        .header("X-QGIS-Project-File", project)
        .timeout(Duration::from_secs_f64(config.network_timeout))
        .send()
        .await
        .map_err(|err| ApiError::bad_gateway(format!("backend request failed: {}", err)))
}

/// Public item path for a created feature, derived from the backend's
/// `Location` header.
pub fn created_location(backend_location: &str, ctx: &OapiContext) -> String {
    let new_id = backend_location.rsplit('/').next().unwrap_or_default();
    let api_path = format!("{}/{}.json", self_trimmed(&ctx.api_path), new_id);
    ctx.public_path(&api_path)
}

fn self_trimmed(api_path: &str) -> &str {
    api_path.trim_matches('/')
}

/// Rewrite links, filter out unpermitted content and add navigation metadata
/// to a successful backend response document.
pub fn shape_response(route: Route, json: &mut Value, ctx: &OapiContext, params: &Params) {
    ctx.rewriter().rewrite(json);

    // API descriptions list backend paths as object keys
    if let Some(Value::Object(paths)) = json.get_mut("paths") {
        let backend_root = url::Url::parse(&ctx.oapi_backend_url)
            .map(|url| url.path().to_string())
            .unwrap_or_default();
        let rewritten: Map<String, Value> = std::mem::take(paths)
            .into_iter()
            .map(|(key, value)| match key.strip_prefix(&backend_root) {
                Some(rest) => (format!("{}{}", ctx.public_root, rest), value),
                None => (key, value),
            })
            .collect();
        *paths = rewritten;
    }

    if let Some(auth_path) = &ctx.auth_path {
        if let Some(Value::Array(top_links)) = json.get_mut("links") {
            let (endpoint, title) = match ctx.identity.username() {
                Some(username) => ("logout", format!("Logout {}", username)),
                None => ("login", "Login".to_string()),
            };
            top_links.push(json!({
                "href": format!(
                    "{}{}?url={}",
                    auth_path,
                    endpoint,
                    urlencoding::encode(&ctx.current_url())
                ),
                "rel": "auth",
                "title": title,
                "type": "text/html",
            }));
        }
    }

    match route {
        Route::Collections => {
            if let Some(Value::Array(collections)) = json.get_mut("collections") {
                collections.retain(|entry| {
                    entry["id"]
                        .as_str()
                        .map(|id| ctx.permissions.is_permitted(&clean_layer_name(id)))
                        .unwrap_or(false)
                });
            }
        }
        Route::Items => shape_items_response(json, ctx, params),
        Route::Item => {
            if let Some(layer) = collection_id(&ctx.api_path)
                .and_then(|id| ctx.permissions.layer(&id))
            {
                if let Some(Value::Object(properties)) = json.get_mut("properties") {
                    filter_feature_properties(properties, layer);
                }
            }
        }
        _ => {}
    }
}

fn shape_items_response(json: &mut Value, ctx: &OapiContext, params: &Params) {
    let Some(layer) = collection_id(&ctx.api_path).and_then(|id| ctx.permissions.layer(&id))
    else {
        return;
    };

    if let Some(Value::Array(features)) = json.get_mut("features") {
        for feature in features {
            if let Some(Value::Object(properties)) = feature.get_mut("properties") {
                filter_feature_properties(properties, layer);
            }
        }
    }

    if !ctx.html_format {
        return;
    }

    let number_matched = json["numberMatched"].as_u64().unwrap_or(0);
    let cleaned_url = links::cleaned_query_url(&ctx.current_url());
    let pagesize = links::page_size_links(&cleaned_url, number_matched, ctx.oapif_max_limit);

    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let self_href = json["links"]
        .as_array()
        .and_then(|links| {
            links
                .iter()
                .find(|link| link["rel"] == "self")
                .and_then(|link| link["href"].as_str())
        })
        .unwrap_or_default()
        .to_string();
    let pagination =
        links::pagination_links(&cleaned_url, &self_href, number_matched, limit, offset);

    if let Some(object) = json.as_object_mut() {
        object.insert("pagesize".to_string(), Value::Array(pagesize));
        object.insert("pagination".to_string(), Value::Array(pagination));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WfsServiceDoc;
    use crate::catalog::resources::WfsResources;
    use crate::permissions::WfsServiceGrant;

    fn permissions() -> WfsPermissionSet {
        let doc: WfsServiceDoc = serde_json::from_str(
            r#"{
                "name": "qwc_demo",
                "layers": [
                    {
                        "name": "edit_points",
                        "attributes": [
                            "id",
                            {"name": "description", "alias": "Description"},
                            "geometry"
                        ]
                    },
                    {"name": "ÖV: Haltestellen", "attributes": ["id", "geometry"]}
                ]
            }"#,
        )
        .unwrap();
        let resources = WfsResources::from_doc(&doc, "http://localhost:8001/ows/");
        let grant: WfsServiceGrant = serde_json::from_str(
            r#"{
                "name": "qwc_demo",
                "layers": [
                    {
                        "name": "edit_points",
                        "attributes": ["id", "description"],
                        "writable": true,
                        "creatable": true,
                        "updatable": true
                    },
                    {"name": "ÖV: Haltestellen", "attributes": ["id"], "readable": false}
                ]
            }"#,
        )
        .unwrap();
        WfsPermissionSet::resolve(&resources, &[&grant]).unwrap()
    }

    fn context<'a>(
        permissions: &'a WfsPermissionSet,
        identity: &'a Identity,
        api_path: &str,
        format_ext: &str,
    ) -> OapiContext<'a> {
        OapiContext::new(
            permissions,
            identity,
            &ServiceConfig::default(),
            "",
            api_path,
            format_ext,
            None,
        )
    }

    #[test]
    fn route_table_rejects_unknown_endpoints() {
        assert_eq!(match_route("", &Method::GET).unwrap(), Route::LandingPage);
        assert_eq!(
            match_route("/collections/a/items", &Method::POST).unwrap(),
            Route::Items
        );
        let err = match_route("/collections/a/items", &Method::DELETE).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            err.description(),
            "Endpoint /collections/a/items for method DELETE does not exist"
        );
        assert!(match_route("/nothing/here", &Method::GET).is_err());
    }

    #[test]
    fn format_extension_is_split_off() {
        assert_eq!(
            split_format("collections/a/items.json"),
            ("collections/a/items".to_string(), "json".to_string())
        );
        assert_eq!(
            split_format("collections/a"),
            ("collections/a".to_string(), String::new())
        );
    }

    #[test]
    fn unreadable_collection_is_not_found() {
        let permissions = permissions();
        let path = "/collections/ÖV-_Haltestellen/items/1";
        let err = filter_request(
            Route::Item,
            &Method::GET,
            path,
            &permissions,
            &mut Value::Null,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.description().contains("(ÖV-_Haltestellen)"));
    }

    #[test]
    fn create_payload_is_filtered() {
        let permissions = permissions();
        let mut data = json!({
            "type": "Feature",
            "properties": {"id": 1, "description": "x", "secret": "y"}
        });
        filter_request(
            Route::Items,
            &Method::POST,
            "/collections/edit_points/items",
            &permissions,
            &mut data,
        )
        .unwrap();
        let keys: Vec<&String> = data["properties"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "description"]);
    }

    #[test]
    fn patch_filters_modify_without_rejecting() {
        let permissions = permissions();
        let mut data = json!({"modify": {"eigentümer": "X", "description": "ok"}});
        filter_request(
            Route::Item,
            &Method::PATCH,
            "/collections/edit_points/items/5",
            &permissions,
            &mut data,
        )
        .unwrap();
        let object = data["modify"].as_object().unwrap();
        assert!(!object.contains_key("eigentümer"));
        assert!(object.contains_key("description"));
    }

    #[test]
    fn delete_without_capability_is_forbidden() {
        let permissions = permissions();
        let err = filter_request(
            Route::Item,
            &Method::DELETE,
            "/collections/edit_points/items/5",
            &permissions,
            &mut Value::Null,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(
            err.description(),
            "Features in layer 'edit_points' cannot be deleted"
        );
    }

    #[test]
    fn collections_listing_is_filtered() {
        let permissions = permissions();
        let identity = Identity::Anonymous;
        let ctx = context(&permissions, &identity, "/collections", "json");
        let mut doc = json!({
            "collections": [
                {"id": "edit_points", "links": []},
                {"id": "not_granted", "links": []}
            ]
        });
        shape_response(Route::Collections, &mut doc, &ctx, &Params::new());
        let ids: Vec<&str> = doc["collections"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["edit_points"]);
    }

    #[test]
    fn feature_properties_resolve_aliases() {
        let permissions = permissions();
        let identity = Identity::Anonymous;
        let ctx = context(&permissions, &identity, "/collections/edit_points/items", "json");
        let mut doc = json!({
            "numberMatched": 1,
            "links": [],
            "features": [
                {"id": "edit_points.1", "properties": {"Description": "x", "internal": "y"}}
            ]
        });
        shape_response(Route::Items, &mut doc, &ctx, &Params::new());
        let properties = doc["features"][0]["properties"].as_object().unwrap();
        assert!(properties.contains_key("Description"));
        assert!(!properties.contains_key("internal"));
        // JSON views carry no HTML navigation extras
        assert!(doc.get("pagination").is_none());
    }

    #[test]
    fn html_items_view_gets_pagination() {
        let permissions = permissions();
        let identity = Identity::Anonymous;
        let ctx = context(&permissions, &identity, "/collections/edit_points/items", "html");
        let mut params = Params::new();
        params.insert("limit".to_string(), "10".to_string());
        params.insert("offset".to_string(), "10".to_string());
        let mut doc = json!({
            "numberMatched": 35,
            "links": [
                {"href": "http://localhost:8001/wfs3/collections/edit_points/items?offset=10", "rel": "self"}
            ],
            "features": []
        });
        shape_response(Route::Items, &mut doc, &ctx, &params);
        let pagination = doc["pagination"].as_array().unwrap();
        let titles: Vec<&str> = pagination
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["1", "2", "3", "4"]);
        assert!(!doc["pagesize"].as_array().unwrap().is_empty());
    }

    #[test]
    fn api_description_paths_are_rewritten() {
        let permissions = permissions();
        let identity = Identity::Anonymous;
        let ctx = context(&permissions, &identity, "/api", "json");
        let mut doc = json!({
            "paths": {
                "/wfs3/collections": {},
                "/elsewhere": {}
            }
        });
        shape_response(Route::ApiDescription, &mut doc, &ctx, &Params::new());
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/qwc_demo/features/collections"));
        assert!(paths.contains_key("/elsewhere"));
    }

    #[test]
    fn auth_link_reflects_identity() {
        let permissions = permissions();
        let identity = Identity::user("demo", vec![]);
        let mut ctx = context(&permissions, &identity, "", "json");
        ctx.auth_path = Some("/auth/".to_string());
        let mut doc = json!({"links": []});
        shape_response(Route::LandingPage, &mut doc, &ctx, &Params::new());
        let link = &doc["links"][0];
        assert_eq!(link["rel"], "auth");
        assert_eq!(link["title"], "Logout demo");
        assert!(link["href"].as_str().unwrap().starts_with("/auth/logout?url="));
    }

    #[test]
    fn created_location_points_at_public_item() {
        let permissions = permissions();
        let identity = Identity::Anonymous;
        let ctx = context(&permissions, &identity, "/collections/edit_points/items", "json");
        assert_eq!(
            created_location("http://localhost:8001/wfs3/collections/edit_points/items/42", &ctx),
            "/api/qwc_demo/features/collections/edit_points/items/42.json"
        );
    }
}
