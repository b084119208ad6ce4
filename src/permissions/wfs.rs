//! Merged WFS permission set, shared by the WFS and OGC API Features
//! handlers. Layers are keyed by cleaned name since that is what appears in
//! request parameters, XML tags and collection ids.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::resources::WfsResources;
use crate::ogc::names::{clean_attribute_name, clean_layer_name};
use crate::permissions::WfsServiceGrant;

/// Effective permissions for one permitted WFS layer.
#[derive(Debug, Clone, Default)]
pub struct WfsLayerPermission {
    /// Name as configured, before XML name cleaning.
    pub raw_name: String,
    /// Permitted attribute name/alias pairs, in catalog order.
    pub attributes: Vec<(String, String)>,
    pub readable: bool,
    pub creatable: bool,
    pub updatable: bool,
    pub deletable: bool,
    pub writable: bool,
}

impl WfsLayerPermission {
    /// Cleaned attribute names, as they appear in XML tags and GeoJSON
    /// properties.
    pub fn cleaned_attributes(&self) -> BTreeSet<String> {
        self.attributes
            .iter()
            .map(|(name, _)| clean_attribute_name(name))
            .collect()
    }

    /// Canonical cleaned attribute name for a reported display alias.
    pub fn name_for_alias(&self, alias: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(_, a)| a == alias)
            .map(|(name, _)| clean_attribute_name(name))
    }

    /// Display alias for a cleaned attribute name.
    pub fn alias_for(&self, cleaned: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| clean_attribute_name(name) == cleaned)
            .map(|(_, alias)| alias.as_str())
    }
}

/// Permission set for one (identity, WFS service) pair.
#[derive(Debug, Clone, Default)]
pub struct WfsPermissionSet {
    pub service_name: String,
    pub ogc_url: String,
    pub online_resource: Option<String>,
    /// Cleaned layer name to effective permissions.
    pub permitted_layers: BTreeMap<String, WfsLayerPermission>,
}

impl WfsPermissionSet {
    /// Merge role grants against the catalog. Returns `None` when no grant
    /// references the service.
    pub fn resolve(resources: &WfsResources, grants: &[&WfsServiceGrant]) -> Option<Self> {
        if grants.is_empty() {
            return None;
        }

        let mut permitted_layers: BTreeMap<String, WfsLayerPermission> = BTreeMap::new();

        for grant in grants {
            for layer in &grant.layers {
                let cleaned = clean_layer_name(&layer.name);
                let Some(info) = resources.layers.get(&cleaned) else {
                    // grants cannot manufacture layers
                    continue;
                };
                let entry = permitted_layers
                    .entry(cleaned)
                    .or_insert_with(|| WfsLayerPermission {
                        raw_name: info.raw_name.clone(),
                        ..WfsLayerPermission::default()
                    });

                let granted: BTreeSet<&str> =
                    layer.attributes.iter().map(String::as_str).collect();
                for (name, alias) in &info.attributes {
                    if granted.contains(name.as_str())
                        && !entry.attributes.iter().any(|(n, _)| n == name)
                    {
                        entry.attributes.push((name.clone(), alias.clone()));
                    }
                }

                entry.readable |= layer.readable;
                entry.creatable |= layer.creatable;
                entry.updatable |= layer.updatable;
                entry.deletable |= layer.deletable;
                entry.writable |= layer.writable;
            }
        }

        if permitted_layers.is_empty() {
            return None;
        }

        // restore catalog attribute order after merging
        for (cleaned, entry) in permitted_layers.iter_mut() {
            if let Some(info) = resources.layers.get(cleaned) {
                entry.attributes = info
                    .attributes
                    .iter()
                    .filter(|(name, _)| entry.attributes.iter().any(|(n, _)| n == name))
                    .cloned()
                    .collect();
            }
        }

        Some(Self {
            service_name: resources.name.clone(),
            ogc_url: resources.wfs_url.clone(),
            online_resource: resources.online_resource.clone(),
            permitted_layers,
        })
    }

    pub fn is_permitted(&self, cleaned_name: &str) -> bool {
        self.permitted_layers.contains_key(cleaned_name)
    }

    pub fn layer(&self, cleaned_name: &str) -> Option<&WfsLayerPermission> {
        self.permitted_layers.get(cleaned_name)
    }
}
