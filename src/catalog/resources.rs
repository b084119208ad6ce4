//! Collected per-service resource lookups, derived from the raw catalog
//! documents at tenant load time.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{LayerDoc, WfsServiceDoc, WmsServiceDoc};
use crate::ogc::names::clean_layer_name;

/// Custom online resource overrides for a WMS service.
#[derive(Debug, Clone, Default)]
pub struct OnlineResources {
    pub service: Option<String>,
    pub feature_info: Option<String>,
    pub legend: Option<String>,
}

/// A leaf layer's catalog info.
#[derive(Debug, Clone, Default)]
pub struct WmsLayerInfo {
    pub title: String,
    /// Attribute name to display alias, in catalog order.
    pub attributes: Vec<(String, String)>,
    pub queryable: bool,
    /// Opacity percentage recorded for hidden sublayers.
    pub opacity: Option<u8>,
}

/// A group layer's catalog info.
#[derive(Debug, Clone, Default)]
pub struct WmsGroupInfo {
    /// Sublayer names, top to bottom as declared.
    pub sublayers: Vec<String>,
    pub hide_sublayers: bool,
}

/// Flattened lookups for one WMS service.
#[derive(Debug, Clone, Default)]
pub struct WmsResources {
    pub name: String,
    pub wms_url: String,
    pub print_url: String,
    pub online_resources: OnlineResources,
    pub root_layer: String,
    /// Layers visible without facade expansion, in catalog order.
    pub public_layers: Vec<String>,
    pub layers: BTreeMap<String, WmsLayerInfo>,
    pub group_layers: BTreeMap<String, WmsGroupInfo>,
    pub queryable_layers: BTreeSet<String>,
    /// Layer title to layer name, for feature info results.
    pub layer_name_from_title: BTreeMap<String, String>,
    pub internal_print_layers: Vec<String>,
    pub print_templates: Vec<String>,
}

impl WmsResources {
    pub fn from_doc(doc: &WmsServiceDoc, default_server_url: &str) -> Self {
        let wms_url = doc
            .wms_url
            .clone()
            .unwrap_or_else(|| format!("{}{}", default_server_url, doc.name));
        let print_url = doc.print_url.clone().unwrap_or_else(|| wms_url.clone());

        let mut resources = Self {
            name: doc.name.clone(),
            wms_url,
            print_url,
            online_resources: OnlineResources {
                service: doc.online_resources.service.clone(),
                feature_info: doc.online_resources.feature_info.clone(),
                legend: doc.online_resources.legend.clone(),
            },
            root_layer: doc.root_layer.name.clone(),
            internal_print_layers: doc.internal_print_layers.clone(),
            print_templates: doc.print_templates.clone(),
            ..Self::default()
        };
        resources.collect_layer(&doc.root_layer, false);
        resources
    }

    /// Recursively collect lookups for a layer subtree. `hidden` marks
    /// layers below a `hide_sublayers` group.
    fn collect_layer(&mut self, layer: &LayerDoc, hidden: bool) {
        if !hidden {
            self.public_layers.push(layer.name.clone());
        }

        if !layer.layers.is_empty() {
            let hidden = hidden || layer.hide_sublayers;

            let mut queryable = false;
            let mut sublayers = Vec::new();
            for sublayer in &layer.layers {
                sublayers.push(sublayer.name.clone());
                self.collect_layer(sublayer, hidden);
                if self.queryable_layers.contains(&sublayer.name) {
                    // group is queryable if any sublayer is
                    queryable = true;
                }
            }

            self.group_layers.insert(
                layer.name.clone(),
                WmsGroupInfo {
                    sublayers,
                    hide_sublayers: layer.hide_sublayers,
                },
            );
            if queryable {
                self.queryable_layers.insert(layer.name.clone());
            }
        } else {
            let title = layer.title.clone().unwrap_or_else(|| layer.name.clone());
            self.layers.insert(
                layer.name.clone(),
                WmsLayerInfo {
                    title: title.clone(),
                    attributes: layer.attribute_pairs(),
                    queryable: layer.queryable,
                    opacity: if hidden { layer.opacity } else { None },
                },
            );

            if layer.queryable {
                self.queryable_layers.insert(layer.name.clone());
                self.layer_name_from_title.insert(title, layer.name.clone());
            }
        }
    }
}

/// One WFS layer's catalog info, keyed by cleaned name in [`WfsResources`].
#[derive(Debug, Clone, Default)]
pub struct WfsLayerInfo {
    /// Name as configured, before XML name cleaning.
    pub raw_name: String,
    /// Attribute name to display alias, in catalog order.
    pub attributes: Vec<(String, String)>,
}

/// Flattened lookups for one WFS service.
#[derive(Debug, Clone, Default)]
pub struct WfsResources {
    pub name: String,
    pub wfs_url: String,
    pub online_resource: Option<String>,
    /// Cleaned layer name to layer info.
    pub layers: BTreeMap<String, WfsLayerInfo>,
}

impl WfsResources {
    pub fn from_doc(doc: &WfsServiceDoc, default_server_url: &str) -> Self {
        let wfs_url = doc
            .wfs_url
            .clone()
            .unwrap_or_else(|| format!("{}{}", default_server_url, doc.name));

        let mut layers = BTreeMap::new();
        for layer in &doc.layers {
            layers.insert(
                clean_layer_name(&layer.name),
                WfsLayerInfo {
                    raw_name: layer.name.clone(),
                    attributes: layer.attribute_pairs(),
                },
            );
        }

        Self {
            name: doc.name.clone(),
            wfs_url,
            online_resource: doc.online_resource.clone(),
            layers,
        }
    }
}
