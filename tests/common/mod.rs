// not every test binary uses every helper
#![allow(dead_code)]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use ogc_gatekeeper::config::Settings;
use ogc_gatekeeper::state::AppState;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

const OGC_CONFIG: &str = r#"{
    "config": {
        "default_qgis_server_url": "http://127.0.0.1:1/ows/",
        "oapi_qgis_server_url": "http://127.0.0.1:1/wfs3/",
        "network_timeout": 1.0
    },
    "resources": {
        "wms_services": [{
            "name": "qwc_demo",
            "root_layer": {
                "name": "qwc_demo",
                "layers": [
                    {
                        "name": "edit_points",
                        "title": "Edit Points",
                        "attributes": ["id", "description", "geometry"],
                        "queryable": true
                    },
                    {"name": "europe", "title": "Europe"},
                    {
                        "name": "background",
                        "hide_sublayers": true,
                        "layers": [
                            {"name": "terrain_bg", "opacity": 100},
                            {"name": "osm_bg", "opacity": 50}
                        ]
                    }
                ]
            },
            "internal_print_layers": ["print_crosshair"],
            "print_templates": ["A4 Landscape"]
        }],
        "wfs_services": [{
            "name": "qwc_demo",
            "layers": [
                {"name": "edit_points", "attributes": ["id", "description", "geometry"]},
                {"name": "ÖV: Haltestellen", "attributes": ["id", "geometry"]}
            ]
        }]
    }
}"#;

const PERMISSIONS: &str = r#"{
    "users": [
        {"name": "demo", "roles": ["editor"]}
    ],
    "groups": [],
    "roles": [
        {
            "role": "public",
            "permissions": {
                "wms_services": [{
                    "name": "qwc_demo",
                    "layers": [
                        {"name": "qwc_demo"},
                        {"name": "edit_points", "attributes": ["id", "description", "geometry"]},
                        {"name": "europe"},
                        {"name": "background"},
                        {"name": "terrain_bg"},
                        {"name": "osm_bg"},
                        {"name": "print_crosshair"}
                    ],
                    "print_templates": ["A4 Landscape"]
                }],
                "wfs_services": [{
                    "name": "qwc_demo",
                    "layers": [
                        {"name": "edit_points", "attributes": ["id", "description", "geometry"]},
                        {"name": "ÖV: Haltestellen", "attributes": ["id"], "readable": false}
                    ]
                }]
            }
        },
        {
            "role": "editor",
            "permissions": {
                "wfs_services": [{
                    "name": "qwc_demo",
                    "layers": [
                        {
                            "name": "edit_points",
                            "attributes": ["id", "description", "geometry"],
                            "writable": true,
                            "creatable": true,
                            "updatable": true
                        }
                    ]
                }]
            }
        }
    ]
}"#;

/// Build the application against a throwaway tenant config directory. The
/// backend URLs point at an unroutable port so any unexpected forward fails
/// instead of silently succeeding.
pub fn test_app() -> Result<Router> {
    test_app_with_login(None)
}

/// Same as [`test_app`], with a basic-auth login endpoint configured.
pub fn test_app_with_login(login_url: Option<&str>) -> Result<Router> {
    let dir = std::env::temp_dir().join(format!(
        "ogc-gatekeeper-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    fs::create_dir_all(dir.join("default"))?;
    let mut config: serde_json::Value = serde_json::from_str(OGC_CONFIG)?;
    if let Some(url) = login_url {
        config["config"]["basic_auth_login_url"] = serde_json::json!([url]);
    }
    fs::write(
        dir.join("default").join("ogcConfig.json"),
        serde_json::to_string(&config)?,
    )?;
    fs::write(dir.join("default").join("permissions.json"), PERMISSIONS)?;

    let settings = Settings {
        config_path: dir,
        tenant: "default".to_string(),
        auth_service_url: None,
        jwt_secret: "test-secret".to_string(),
        service_mountpoint: String::new(),
    };
    Ok(ogc_gatekeeper::app(AppState::new(settings)))
}

/// Drive one request through the router and collect the response body.
pub async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, String)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
