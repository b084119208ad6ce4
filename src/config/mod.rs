use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Process-level settings, resolved once at startup from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base directory holding per-tenant config files
    pub config_path: PathBuf,
    /// Tenant served by this deployment
    pub tenant: String,
    /// Auth service base path for login/logout links
    pub auth_service_url: Option<String>,
    /// JWT secret for bearer identities
    pub jwt_secret: String,
    /// Mountpoint prefix when served behind a path-rewriting proxy
    pub service_mountpoint: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            config_path: env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config")),
            tenant: env::var("DEFAULT_TENANT").unwrap_or_else(|_| "default".to_string()),
            auth_service_url: env::var("AUTH_SERVICE_URL").ok(),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
            service_mountpoint: env::var("SERVICE_MOUNTPOINT").unwrap_or_default(),
        }
    }
}

// Global singleton settings - initialized once at startup
pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

// Convenience function for accessing settings
pub fn settings() -> &'static Settings {
    &SETTINGS
}

/// Marker highlight parameter definition from tenant config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerParam {
    #[serde(rename = "type", default = "default_marker_type")]
    pub param_type: String,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_marker_type() -> String {
    "string".to_string()
}

/// Tenant-level service configuration, the `config` section of ogcConfig.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub default_qgis_server_url: String,
    pub qgis_server_url_tenant_suffix: String,
    pub oapi_qgis_server_url: String,
    pub network_timeout: f64,
    pub oapif_max_limit: u64,
    pub public_ogc_url_pattern: String,
    pub qgis_server_identity_parameter: Option<String>,
    pub marker_template: Option<String>,
    pub marker_params: BTreeMap<String, MarkerParam>,
    pub legend_default_font_size: Option<String>,
    pub basic_auth_login_url: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_qgis_server_url: "http://localhost:8001/ows/".to_string(),
            qgis_server_url_tenant_suffix: String::new(),
            oapi_qgis_server_url: "http://localhost:8001/wfs3/".to_string(),
            network_timeout: 30.0,
            oapif_max_limit: 10000,
            public_ogc_url_pattern: "$origin$/$tenant$/$mountpoint$".to_string(),
            qgis_server_identity_parameter: None,
            marker_template: None,
            marker_params: BTreeMap::new(),
            legend_default_font_size: None,
            basic_auth_login_url: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Environment variables take precedence over the tenant config file
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("DEFAULT_QGIS_SERVER_URL") {
            self.default_qgis_server_url = v;
        }
        if let Ok(v) = env::var("OAPI_QGIS_SERVER_URL") {
            self.oapi_qgis_server_url = v;
        }
        if let Ok(v) = env::var("NETWORK_TIMEOUT") {
            self.network_timeout = v.parse().unwrap_or(self.network_timeout);
        }
        if let Ok(v) = env::var("OAPIF_MAX_LIMIT") {
            self.oapif_max_limit = v.parse().unwrap_or(self.oapif_max_limit);
        }
        self
    }

    /// Default QGIS server URL with a guaranteed trailing slash
    pub fn qgis_server_base(&self) -> String {
        format!("{}/", self.default_qgis_server_url.trim_end_matches('/'))
    }

    /// OGC API Features backend URL without a trailing slash
    pub fn oapi_server_base(&self) -> String {
        self.oapi_qgis_server_url.trim_end_matches('/').to_string()
    }

    /// Marker parameter definitions with the implicit X/Y coordinates and any
    /// MARKER_<KEY> environment overrides applied to defaults.
    pub fn resolved_marker_params(&self) -> BTreeMap<String, ResolvedMarkerParam> {
        let mut resolved = BTreeMap::new();
        resolved.insert(
            "X".to_string(),
            ResolvedMarkerParam {
                param_type: "number".to_string(),
                value: None,
            },
        );
        resolved.insert(
            "Y".to_string(),
            ResolvedMarkerParam {
                param_type: "number".to_string(),
                value: None,
            },
        );
        for (key, entry) in &self.marker_params {
            let key = key.to_uppercase();
            let env_key = format!("MARKER_{}", key);
            let value = env::var(&env_key)
                .ok()
                .or_else(|| entry.default.clone())
                .unwrap_or_default();
            tracing::info!("Setting marker param value {}={}", key, value);
            resolved.insert(
                key,
                ResolvedMarkerParam {
                    param_type: entry.param_type.clone(),
                    value: Some(value),
                },
            );
        }
        resolved
    }
}

/// A marker parameter with its default value resolved.
#[derive(Debug, Clone)]
pub struct ResolvedMarkerParam {
    pub param_type: String,
    pub value: Option<String>,
}
