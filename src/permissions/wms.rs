//! Merged WMS permission set for one identity and service.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::resources::{OnlineResources, WmsResources};
use crate::permissions::WmsServiceGrant;

/// Effective permissions for one permitted WMS layer.
#[derive(Debug, Clone, Default)]
pub struct WmsLayerPermission {
    pub title: String,
    /// Permitted attribute name/alias pairs, in catalog order.
    pub attributes: Vec<(String, String)>,
    pub queryable: bool,
    /// Catalog opacity percent for hidden sublayers.
    pub opacity: Option<u8>,
}

impl WmsLayerPermission {
    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.attributes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn aliases(&self) -> BTreeSet<&str> {
        self.attributes.iter().map(|(_, alias)| alias.as_str()).collect()
    }

    /// Canonical attribute name for a reported alias.
    pub fn name_for_alias<'a>(&'a self, alias: &str) -> Option<&'a str> {
        self.attributes
            .iter()
            .find(|(_, a)| a == alias)
            .map(|(name, _)| name.as_str())
    }
}

/// Permission set for one (identity, WMS service) pair, merged across roles
/// and intersected with the catalog.
#[derive(Debug, Clone, Default)]
pub struct WmsPermissionSet {
    pub service_name: String,
    pub ogc_url: String,
    pub print_url: String,
    pub online_resources: OnlineResources,
    pub root_layer: String,
    /// Permitted layers visible without facade expansion, in catalog order.
    pub public_layers: Vec<String>,
    /// All permitted layers and groups.
    pub permitted_layers: BTreeMap<String, WmsLayerPermission>,
    pub queryable_layers: BTreeSet<String>,
    /// Layer title to layer name, for feature info results.
    pub layer_name_from_title: BTreeMap<String, String>,
    /// Facade groups to their permitted sublayers, top to bottom.
    pub restricted_group_layers: BTreeMap<String, Vec<String>>,
    pub edit_layers: BTreeSet<String>,
    pub internal_print_layers: Vec<String>,
    pub print_templates: Vec<String>,
}

impl WmsPermissionSet {
    /// Merge role grants against the catalog. Returns `None` when no grant
    /// references the service, which callers treat as "service unknown or
    /// not permitted".
    pub fn resolve(resources: &WmsResources, grants: &[&WmsServiceGrant]) -> Option<Self> {
        if grants.is_empty() {
            return None;
        }

        struct Acc {
            attributes: BTreeSet<String>,
            queryable: bool,
            edit: bool,
        }

        let mut granted: BTreeMap<String, Acc> = BTreeMap::new();
        let mut granted_templates: BTreeSet<&str> = BTreeSet::new();

        for grant in grants {
            for layer in &grant.layers {
                let exists = resources.layers.contains_key(&layer.name)
                    || resources.group_layers.contains_key(&layer.name)
                    || resources.internal_print_layers.contains(&layer.name);
                if !exists {
                    // grants cannot manufacture layers
                    continue;
                }
                let acc = granted.entry(layer.name.clone()).or_insert(Acc {
                    attributes: BTreeSet::new(),
                    queryable: false,
                    edit: false,
                });
                let catalog_attributes: BTreeSet<&str> = resources
                    .layers
                    .get(&layer.name)
                    .map(|info| info.attributes.iter().map(|(n, _)| n.as_str()).collect())
                    .unwrap_or_default();
                acc.attributes.extend(
                    layer
                        .attributes
                        .iter()
                        .filter(|attr| catalog_attributes.contains(attr.as_str()))
                        .cloned(),
                );
                acc.queryable |= layer.queryable.unwrap_or(true);
                acc.edit |= layer.edit;
            }
            granted_templates.extend(
                grant
                    .print_templates
                    .iter()
                    .map(String::as_str)
                    .filter(|t| resources.print_templates.iter().any(|p| p == t)),
            );
        }

        let mut set = Self {
            service_name: resources.name.clone(),
            ogc_url: resources.wms_url.clone(),
            print_url: resources.print_url.clone(),
            online_resources: resources.online_resources.clone(),
            root_layer: resources.root_layer.clone(),
            internal_print_layers: resources
                .internal_print_layers
                .iter()
                .filter(|l| granted.contains_key(*l))
                .cloned()
                .collect(),
            print_templates: resources
                .print_templates
                .iter()
                .filter(|t| granted_templates.contains(t.as_str()))
                .cloned()
                .collect(),
            ..Self::default()
        };

        set.public_layers = resources
            .public_layers
            .iter()
            .filter(|l| granted.contains_key(*l))
            .cloned()
            .collect();

        for (name, acc) in &granted {
            let (title, attributes, catalog_queryable, opacity) =
                match resources.layers.get(name) {
                    Some(info) => (
                        info.title.clone(),
                        info.attributes
                            .iter()
                            .filter(|(n, _)| acc.attributes.contains(n))
                            .cloned()
                            .collect(),
                        info.queryable,
                        info.opacity,
                    ),
                    // group or print-only layer
                    None => (
                        name.clone(),
                        Vec::new(),
                        resources.queryable_layers.contains(name),
                        None,
                    ),
                };
            let queryable = catalog_queryable && acc.queryable;
            if queryable {
                set.queryable_layers.insert(name.clone());
            }
            if acc.edit {
                set.edit_layers.insert(name.clone());
            }
            set.permitted_layers.insert(
                name.clone(),
                WmsLayerPermission {
                    title,
                    attributes,
                    queryable,
                    opacity,
                },
            );
        }

        for (title, name) in &resources.layer_name_from_title {
            if granted.contains_key(name) {
                set.layer_name_from_title.insert(title.clone(), name.clone());
            }
        }

        for (name, group) in &resources.group_layers {
            if group.hide_sublayers && granted.contains_key(name) {
                set.restricted_group_layers.insert(
                    name.clone(),
                    group
                        .sublayers
                        .iter()
                        .filter(|l| granted.contains_key(*l))
                        .cloned()
                        .collect(),
                );
            }
        }

        Some(set)
    }

    /// Catalog opacity percentages for permitted hidden sublayers.
    pub fn sublayer_opacities(&self) -> BTreeMap<String, u8> {
        self.permitted_layers
            .iter()
            .filter_map(|(name, perm)| perm.opacity.map(|o| (name.clone(), o)))
            .collect()
    }

    pub fn is_public_layer(&self, name: &str) -> bool {
        self.public_layers.iter().any(|l| l == name)
    }
}
