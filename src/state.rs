//! Shared application state passed to handlers.

use std::sync::Arc;

use crate::catalog::{ConfigError, TenantCache, TenantConfig};
use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tenants: Arc<TenantCache>,
    /// Shared backend client. Timeouts are applied per request from the
    /// tenant's service config.
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            tenants: Arc::new(TenantCache::new()),
            client: reqwest::Client::new(),
        }
    }

    /// Configuration of the deployment's tenant, reloaded on file change.
    pub fn tenant_config(&self) -> Result<Arc<TenantConfig>, ConfigError> {
        self.tenants.lookup(&self.settings, &self.settings.tenant)
    }
}
