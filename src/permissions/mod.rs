//! Permission documents and role resolution.
//!
//! `permissions.json` maps users to groups and roles, and roles to per-service
//! layer grants. A request's effective permissions are the union of all grants
//! from the identity's roles, intersected with the resource catalog.

pub mod wfs;
pub mod wms;

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::auth::Identity;

pub use wfs::{WfsLayerPermission, WfsPermissionSet};
pub use wms::{WmsLayerPermission, WmsPermissionSet};

/// Role name granted to every request, authenticated or not.
pub const PUBLIC_ROLE: &str = "public";

/// `permissions.json` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionsDoc {
    #[serde(default)]
    pub users: Vec<UserDoc>,
    #[serde(default)]
    pub groups: Vec<GroupDoc>,
    #[serde(default)]
    pub roles: Vec<RoleDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserDoc {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupDoc {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDoc {
    pub role: String,
    #[serde(default)]
    pub permissions: RoleGrants,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleGrants {
    #[serde(default)]
    pub wms_services: Vec<WmsServiceGrant>,
    #[serde(default)]
    pub wfs_services: Vec<WfsServiceGrant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WmsServiceGrant {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<WmsLayerGrant>,
    #[serde(default)]
    pub print_templates: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WmsLayerGrant {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Defaults to true; the catalog's queryable flag still applies.
    pub queryable: Option<bool>,
    /// Marks the layer as editable in project settings.
    #[serde(default)]
    pub edit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WfsServiceGrant {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<WfsLayerGrant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WfsLayerGrant {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default)]
    pub creatable: bool,
    #[serde(default)]
    pub updatable: bool,
    #[serde(default)]
    pub deletable: bool,
    #[serde(default)]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl PermissionsDoc {
    /// Role names applicable to an identity: the public role, the user's own
    /// roles, and the roles of every group the user belongs to (from the
    /// user record or from token claims).
    pub fn resolve_roles(&self, identity: &Identity) -> BTreeSet<String> {
        let mut roles = BTreeSet::new();
        roles.insert(PUBLIC_ROLE.to_string());

        let mut group_names: BTreeSet<&str> = identity
            .groups()
            .iter()
            .map(String::as_str)
            .collect();

        if let Some(username) = identity.username() {
            if let Some(user) = self.users.iter().find(|u| u.name == username) {
                roles.extend(user.roles.iter().cloned());
                group_names.extend(user.groups.iter().map(String::as_str));
            }
        }

        for group in &self.groups {
            if group_names.contains(group.name.as_str()) {
                roles.extend(group.roles.iter().cloned());
            }
        }
        roles
    }

    /// All WMS grants for a service, across the identity's roles.
    pub fn wms_grants<'a>(
        &'a self,
        identity: &Identity,
        service_name: &str,
    ) -> Vec<&'a WmsServiceGrant> {
        let roles = self.resolve_roles(identity);
        self.roles
            .iter()
            .filter(|role| roles.contains(&role.role))
            .flat_map(|role| &role.permissions.wms_services)
            .filter(|grant| grant.name == service_name)
            .collect()
    }

    /// All WFS grants for a service, across the identity's roles.
    pub fn wfs_grants<'a>(
        &'a self,
        identity: &Identity,
        service_name: &str,
    ) -> Vec<&'a WfsServiceGrant> {
        let roles = self.resolve_roles(identity);
        self.roles
            .iter()
            .filter(|role| roles.contains(&role.role))
            .flat_map(|role| &role.permissions.wfs_services)
            .filter(|grant| grant.name == service_name)
            .collect()
    }
}
