//! Tenant configuration: raw catalog documents, permission documents, and
//! a modification-time-invalidated per-tenant cache.

pub mod resources;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::info;

use crate::config::{ServiceConfig, Settings};
use crate::permissions::PermissionsDoc;
use resources::{WfsResources, WmsResources};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// `ogcConfig.json`: service settings plus the resource catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct OgcConfigDoc {
    #[serde(default)]
    pub config: ServiceConfig,
    #[serde(default)]
    pub resources: ResourceCatalogDoc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceCatalogDoc {
    #[serde(default)]
    pub wms_services: Vec<WmsServiceDoc>,
    #[serde(default)]
    pub wfs_services: Vec<WfsServiceDoc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnlineResourcesDoc {
    pub service: Option<String>,
    pub feature_info: Option<String>,
    pub legend: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WmsServiceDoc {
    pub name: String,
    pub wms_url: Option<String>,
    #[serde(default)]
    pub online_resources: OnlineResourcesDoc,
    pub root_layer: LayerDoc,
    pub print_url: Option<String>,
    #[serde(default)]
    pub internal_print_layers: Vec<String>,
    #[serde(default)]
    pub print_templates: Vec<String>,
}

/// A layer tree node. Leaf layers carry attributes, group layers carry
/// sublayers.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerDoc {
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerDoc>,
    #[serde(default)]
    pub attributes: Vec<AttributeDoc>,
    #[serde(default)]
    pub queryable: bool,
    /// Opacity percent (0-100) for hidden sublayers.
    pub opacity: Option<u8>,
    #[serde(default)]
    pub hide_sublayers: bool,
}

impl LayerDoc {
    /// Attribute name/alias pairs in declaration order. A bare name aliases
    /// to itself.
    pub fn attribute_pairs(&self) -> Vec<(String, String)> {
        self.attributes
            .iter()
            .map(|attr| match attr {
                AttributeDoc::Name(name) => (name.clone(), name.clone()),
                AttributeDoc::Full { name, alias } => (
                    name.clone(),
                    alias.clone().unwrap_or_else(|| name.clone()),
                ),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeDoc {
    Name(String),
    Full { name: String, alias: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WfsServiceDoc {
    pub name: String,
    pub wfs_url: Option<String>,
    pub online_resource: Option<String>,
    #[serde(default)]
    pub layers: Vec<WfsLayerDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WfsLayerDoc {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDoc>,
}

impl WfsLayerDoc {
    /// Attribute name/alias pairs in declaration order. A bare name aliases
    /// to itself.
    pub fn attribute_pairs(&self) -> Vec<(String, String)> {
        self.attributes
            .iter()
            .map(|attr| match attr {
                AttributeDoc::Name(name) => (name.clone(), name.clone()),
                AttributeDoc::Full { name, alias } => (
                    name.clone(),
                    alias.clone().unwrap_or_else(|| name.clone()),
                ),
            })
            .collect()
    }
}

/// Fully loaded tenant state: resolved service settings, collected per-service
/// lookups, and the raw permission documents.
#[derive(Debug)]
pub struct TenantConfig {
    pub tenant: String,
    pub service_config: ServiceConfig,
    pub wms_services: HashMap<String, Arc<WmsResources>>,
    pub wfs_services: HashMap<String, Arc<WfsResources>>,
    pub permissions: PermissionsDoc,
}

impl TenantConfig {
    fn load(settings: &Settings, tenant: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(&settings.config_path).join(tenant);
        let config_doc: OgcConfigDoc = read_json(&dir.join("ogcConfig.json"))?;
        let permissions: PermissionsDoc = read_json(&dir.join("permissions.json"))?;

        let service_config = config_doc.config.with_env_overrides();
        let base_url = service_config.qgis_server_base();

        let mut wms_services = HashMap::new();
        for wms in &config_doc.resources.wms_services {
            wms_services.insert(
                wms.name.clone(),
                Arc::new(WmsResources::from_doc(wms, &base_url)),
            );
        }
        let mut wfs_services = HashMap::new();
        for wfs in &config_doc.resources.wfs_services {
            wfs_services.insert(
                wfs.name.clone(),
                Arc::new(WfsResources::from_doc(wfs, &base_url)),
            );
        }

        info!(
            tenant,
            wms = wms_services.len(),
            wfs = wfs_services.len(),
            "loaded tenant configuration"
        );

        Ok(Self {
            tenant: tenant.to_string(),
            service_config,
            wms_services,
            wfs_services,
            permissions,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

struct CachedTenant {
    mtimes: Vec<Option<SystemTime>>,
    config: Arc<TenantConfig>,
}

/// Per-tenant configuration cache, reloaded when either config file's
/// modification time changes.
#[derive(Default)]
pub struct TenantCache {
    entries: Mutex<HashMap<String, CachedTenant>>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(
        &self,
        settings: &Settings,
        tenant: &str,
    ) -> Result<Arc<TenantConfig>, ConfigError> {
        let dir = Path::new(&settings.config_path).join(tenant);
        let mtimes = vec![
            file_mtime(&dir.join("ogcConfig.json")),
            file_mtime(&dir.join("permissions.json")),
        ];

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = entries.get(tenant) {
            if cached.mtimes == mtimes {
                return Ok(cached.config.clone());
            }
        }

        let config = Arc::new(TenantConfig::load(settings, tenant)?);
        entries.insert(
            tenant.to_string(),
            CachedTenant {
                mtimes,
                config: config.clone(),
            },
        );
        Ok(config)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
