//! Expansion of restricted group layers ("facade layers") into their
//! permitted sublayers, with opacity and style propagation.

use std::collections::BTreeMap;

/// One requested layer with its resolved opacity (0-255) and style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    pub layer: String,
    pub opacity: u8,
    pub style: String,
}

impl LayerEntry {
    pub fn new(layer: impl Into<String>, opacity: u8, style: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            opacity,
            style: style.into(),
        }
    }
}

/// Pair requested layers with opacities and styles, padding to equal length.
///
/// Out-of-range opacities coerce to 255, unparseable ones to 0. Missing
/// entries pad with 255, except the first entry of an explicitly present but
/// empty OPACITIES parameter, which pads with 0. The asymmetric default
/// matches observed client behavior and must not be "fixed".
pub fn padded_layer_entries(
    requested_layers: &[&str],
    opacities_param: Option<&str>,
    styles_param: Option<&str>,
) -> Vec<LayerEntry> {
    let requested_opacities: Vec<&str> = match opacities_param {
        Some(value) if !value.is_empty() => value.split(',').collect(),
        _ => Vec::new(),
    };
    let requested_styles: Vec<&str> = match styles_param {
        Some(value) if !value.is_empty() => value.split(',').collect(),
        _ => Vec::new(),
    };

    requested_layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            let opacity = match requested_opacities.get(i) {
                Some(text) => match text.trim().parse::<i64>() {
                    Ok(value) if (0..=255).contains(&value) => value as u8,
                    Ok(_) => 255,
                    Err(_) => 0,
                },
                None => {
                    if i == 0 && opacities_param.is_some() {
                        // empty OPACITIES param
                        0
                    } else {
                        255
                    }
                }
            };
            let style = requested_styles.get(i).copied().unwrap_or("").to_string();
            LayerEntry::new(*layer, opacity, style)
        })
        .collect()
}

/// Recursively replace restricted group layers with their permitted
/// sublayers.
///
/// Sublayers are emitted in reverse catalog order: group definitions list
/// layers top to bottom while map rendering stacks bottom to top. A
/// sublayer's opacity is the group opacity scaled by the sublayer's catalog
/// opacity percentage; expanded sublayers carry no style.
pub fn expand_layer_entries(
    entries: &[LayerEntry],
    restricted_group_layers: &BTreeMap<String, Vec<String>>,
    layer_opacities: &BTreeMap<String, u8>,
) -> Vec<LayerEntry> {
    let mut expanded = Vec::new();
    for entry in entries {
        match restricted_group_layers.get(&entry.layer) {
            Some(sublayers) => expand_restricted_group(
                sublayers,
                entry.opacity,
                restricted_group_layers,
                layer_opacities,
                &mut expanded,
            ),
            None => expanded.push(entry.clone()),
        }
    }
    expanded
}

fn expand_restricted_group(
    sublayers: &[String],
    group_opacity: u8,
    restricted_group_layers: &BTreeMap<String, Vec<String>>,
    layer_opacities: &BTreeMap<String, u8>,
    out: &mut Vec<LayerEntry>,
) {
    for sublayer in sublayers.iter().rev() {
        let opacity_percent = layer_opacities.get(sublayer).copied().unwrap_or(100);
        let opacity =
            (f64::from(group_opacity) * f64::from(opacity_percent) / 100.0).round() as u8;
        match restricted_group_layers.get(sublayer) {
            Some(nested) => expand_restricted_group(
                nested,
                opacity,
                restricted_group_layers,
                layer_opacities,
                out,
            ),
            None => out.push(LayerEntry::new(sublayer.clone(), opacity, "")),
        }
    }
}

/// Comma-join helpers for re-stringifying expanded parameters.
pub fn layers_list(entries: &[LayerEntry]) -> String {
    entries
        .iter()
        .map(|e| e.layer.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn opacities_list(entries: &[LayerEntry]) -> String {
    entries
        .iter()
        .map(|e| e.opacity.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn styles_list(entries: &[LayerEntry]) -> String {
    entries
        .iter()
        .map(|e| e.style.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
