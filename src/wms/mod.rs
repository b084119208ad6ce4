//! WMS request validation, parameter rewriting and response filtering.

pub mod capabilities;
pub mod feature_info;
pub mod marker;
pub mod translations;

use std::collections::BTreeSet;

use crate::auth::Identity;
use crate::config::ServiceConfig;
use crate::error::OwsException;
use crate::ogc::expand::{
    expand_layer_entries, layers_list, opacities_list, padded_layer_entries, styles_list,
    LayerEntry,
};
use crate::ogc::{map_param_prefix, Params, WmsVerb};
use crate::permissions::{PermissionsDoc, WmsPermissionSet};

/// Request-scoped context for parameter rewriting.
pub struct WmsRequestContext<'a> {
    pub permissions: &'a WmsPermissionSet,
    pub service_config: &'a ServiceConfig,
    pub permissions_doc: &'a PermissionsDoc,
    pub identity: &'a Identity,
    pub tenant: &'a str,
    /// Request origin, e.g. `https://example.com`.
    pub origin: &'a str,
    pub mountpoint: &'a str,
}

impl WmsRequestContext<'_> {
    /// Public proxy base URL per the configured pattern, with a trailing
    /// slash. EXTERNAL_WMS URLs starting with this point back at the proxy.
    pub fn public_ogc_base(&self) -> String {
        let mountpoint = self.mountpoint.trim_matches('/');
        let mountpoint = if mountpoint.is_empty() {
            String::new()
        } else {
            format!("{}/", mountpoint)
        };
        self.service_config
            .public_ogc_url_pattern
            .replace("$origin$", self.origin.trim_end_matches('/'))
            .replace("$tenant$", self.tenant)
            .replace("$mountpoint$", &mountpoint)
    }
}

/// Outcome of parameter adjustment.
#[derive(Debug, Default)]
pub struct WmsAdjustment {
    /// Marker payloads can exceed URL length limits.
    pub force_post: bool,
    /// Client's INFO_FORMAT before forcing text/xml transport.
    pub requested_info_format: Option<String>,
}

const LAYER_MANDATORY_VERBS: &[WmsVerb] = &[
    WmsVerb::GetMap,
    WmsVerb::GetFeatureInfo,
    WmsVerb::GetLegendGraphic,
    WmsVerb::DescribeLayer,
    WmsVerb::GetStyle,
    WmsVerb::GetStyles,
];

/// Layer list parameter consulted for a verb.
fn layers_param_for(verb: WmsVerb, params: &Params) -> String {
    match verb {
        WmsVerb::GetPrint => match map_param_prefix(params) {
            Some(mapname) => {
                let key = format!("{}:LAYERS", mapname);
                if params.contains_key(&key) {
                    key
                } else {
                    "LAYERS".to_string()
                }
            }
            None => "LAYERS".to_string(),
        },
        WmsVerb::GetLegendGraphic
            if !params.contains_key("LAYERS") && params.contains_key("LAYER") =>
        {
            "LAYER".to_string()
        }
        _ => "LAYERS".to_string(),
    }
}

/// References to external map services pass through untouched.
fn is_passthrough_layer(name: &str) -> bool {
    name.starts_with("EXTERNAL_WMS:")
        || ((name.starts_with("wms:") || name.starts_with("wfs:")) && name.contains('#'))
}

/// Check request parameters against the permission set.
pub fn validate_request(
    verb: WmsVerb,
    params: &Params,
    permissions: &WmsPermissionSet,
) -> Result<(), OwsException> {
    let layers_param = layers_param_for(verb, params);

    let mut allowed: BTreeSet<&str> = permissions
        .public_layers
        .iter()
        .map(String::as_str)
        .collect();
    let raster_export = verb == WmsVerb::GetMap
        && params.get("FILENAME").map_or(false, |f| !f.is_empty());
    if raster_export || verb == WmsVerb::GetPrint {
        // raster export and printing may use background layers
        allowed.extend(permissions.internal_print_layers.iter().map(String::as_str));
    }

    match params.get(&layers_param) {
        Some(layers) if !layers.is_empty() => {
            for layer in layers.split(',') {
                if !layer.is_empty()
                    && !is_passthrough_layer(layer)
                    && !allowed.contains(layer)
                {
                    return Err(OwsException::new(
                        "LayerNotDefined",
                        format!("Layer \"{}\" does not exist or is not permitted", layer),
                    ));
                }
            }
        }
        _ if LAYER_MANDATORY_VERBS.contains(&verb) => {
            return Err(OwsException::new(
                "MissingParameterValue",
                format!(
                    "{} is mandatory for {} operation",
                    layers_param,
                    verb.as_str()
                ),
            ));
        }
        _ => {}
    }

    match verb {
        WmsVerb::GetFeatureInfo => {
            if params.get("LAYERS") != params.get("QUERY_LAYERS") {
                return Err(OwsException::new(
                    "InvalidParameterValue",
                    "LAYERS must be identical to QUERY_LAYERS for GETFEATUREINFO operation",
                ));
            }
            let info_format = params
                .get("INFO_FORMAT")
                .map(String::as_str)
                .unwrap_or("text/plain");
            if !["text/plain", "text/html", "text/xml"].contains(&info_format) {
                return Err(OwsException::new(
                    "InvalidFormat",
                    format!(
                        "Feature info format '{}' is not supported. Possibilities \
                         are 'text/plain', 'text/html' or 'text/xml'.",
                        info_format
                    ),
                ));
            }
        }
        WmsVerb::GetPrint => {
            let template = params.get("TEMPLATE").map(String::as_str).unwrap_or("");
            if !permissions.print_templates.iter().any(|t| t == template) {
                return Err(OwsException::new(
                    "Error",
                    format!(
                        "Composer template '{}' not found or not permitted",
                        template
                    ),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Rewrite request parameters after validation: facade expansion, external
/// URL rewriting, legend tweaks and marker highlights.
pub fn adjust_request(
    verb: WmsVerb,
    params: &mut Params,
    ctx: &WmsRequestContext<'_>,
) -> Result<WmsAdjustment, OwsException> {
    let mut adjustment = WmsAdjustment::default();

    match verb {
        WmsVerb::GetMap => {
            let expanded = expand_requested_layers(params, "LAYERS", ctx);
            params.insert("LAYERS".to_string(), layers_list(&expanded));
            params.insert("OPACITIES".to_string(), opacities_list(&expanded));
            params.insert("STYLES".to_string(), styles_list(&expanded));

            if let Some(marker) = params.get("MARKER").cloned() {
                if let Some(template) = &ctx.service_config.marker_template {
                    marker::apply_marker(
                        params,
                        &marker,
                        template,
                        &ctx.service_config.resolved_marker_params(),
                    )?;
                    adjustment.force_post = true;
                }
            }
        }
        WmsVerb::GetFeatureInfo => {
            let mut expanded = expand_requested_layers(params, "LAYERS", ctx);
            // only queryable layers reach the backend
            expanded.retain(|entry| {
                ctx.permissions
                    .permitted_layers
                    .get(&entry.layer)
                    .map_or(false, |perm| perm.queryable)
            });
            let layers = layers_list(&expanded);
            params.insert("LAYERS".to_string(), layers.clone());
            params.insert("STYLES".to_string(), styles_list(&expanded));
            params.insert("QUERY_LAYERS".to_string(), layers);

            // request as text/xml, the response filter rebuilds the client format
            adjustment.requested_info_format = Some(
                params
                    .get("INFO_FORMAT")
                    .cloned()
                    .unwrap_or_else(|| "text/plain".to_string()),
            );
            params.insert("INFO_FORMAT".to_string(), "text/xml".to_string());
        }
        WmsVerb::GetLegendGraphic => {
            let layers_param = layers_param_for(verb, params);
            let expanded = expand_requested_layers(params, &layers_param, ctx);
            params.insert(layers_param, layers_list(&expanded));
            params.insert("STYLES".to_string(), styles_list(&expanded));

            // the backend rejects MIME parameters after the type
            let format = params
                .get("FORMAT")
                .map(|f| f.split(';').next().unwrap_or("").to_string())
                .unwrap_or_default();
            params.insert("FORMAT".to_string(), format);
            if let Some(size) = &ctx.service_config.legend_default_font_size {
                for key in ["LAYERFONTSIZE", "ITEMFONTSIZE"] {
                    if !params.contains_key(key) {
                        params.insert(key.to_string(), size.clone());
                    }
                }
            }
        }
        WmsVerb::DescribeLayer => {
            let expanded = expand_requested_layers(params, "LAYERS", ctx);
            params.insert("LAYERS".to_string(), layers_list(&expanded));
        }
        WmsVerb::GetPrint => {
            if let Some(mapname) = map_param_prefix(params) {
                let layers_param = format!("{}:LAYERS", mapname);
                if params.contains_key(&layers_param) {
                    let expanded = expand_requested_layers(params, &layers_param, ctx);
                    let layers = layers_list(&expanded);
                    params.insert(layers_param, layers.clone());
                    // also set LAYERS, so the backend applies OPACITIES correctly
                    params.insert("LAYERS".to_string(), layers);
                    params.insert("OPACITIES".to_string(), opacities_list(&expanded));
                    params.insert("STYLES".to_string(), styles_list(&expanded));
                }
            }
        }
        _ => {}
    }

    Ok(adjustment)
}

/// Expand facade layers for one layer list parameter, rewriting any
/// EXTERNAL_WMS references on the way.
fn expand_requested_layers(
    params: &mut Params,
    layers_param: &str,
    ctx: &WmsRequestContext<'_>,
) -> Vec<LayerEntry> {
    let requested = params.get(layers_param).cloned().unwrap_or_default();
    let requested: Vec<&str> = if requested.is_empty() {
        Vec::new()
    } else {
        requested.split(',').collect()
    };

    let opacities = params.get("OPACITIES").cloned();
    let styles = params.get("STYLES").cloned();
    let entries = padded_layer_entries(
        &requested,
        opacities.as_deref(),
        styles.as_deref(),
    );

    for entry in &entries {
        if entry.layer.starts_with("EXTERNAL_WMS:") {
            rewrite_external_wms_url(&entry.layer, params, ctx);
        }
    }

    expand_layer_entries(
        &entries,
        &ctx.permissions.restricted_group_layers,
        &ctx.permissions.sublayer_opacities(),
    )
}

/// Point EXTERNAL_WMS URLs that address this very proxy directly at the
/// backend. The proxy URL may not resolve from the backend's network, and
/// the backend carries no identity to load restricted layers itself. The
/// external layer list is re-filtered against the external service's own
/// grants.
fn rewrite_external_wms_url(layer: &str, params: &mut Params, ctx: &WmsRequestContext<'_>) {
    let ident = &layer["EXTERNAL_WMS:".len()..];
    let url_param = format!("{}:URL", ident);
    let Some(layer_url) = params.get(&url_param).cloned() else {
        return;
    };

    let public_base = ctx.public_ogc_base();
    let Some(rest) = layer_url.strip_prefix(&public_base) else {
        return;
    };

    let backend_base = ctx.service_config.qgis_server_base();
    params.insert(url_param, format!("{}{}", backend_base, rest));

    let external_service = rest.split('?').next().unwrap_or("").trim_matches('/');
    let mut permitted: BTreeSet<&str> = BTreeSet::new();
    for grant in ctx.permissions_doc.wms_grants(ctx.identity, external_service) {
        permitted.extend(grant.layers.iter().map(|l| l.name.as_str()));
    }

    let layers_param = format!("{}:LAYERS", ident);
    if let Some(ext_layers) = params.get(&layers_param).cloned() {
        let filtered: Vec<&str> = ext_layers
            .split(',')
            .filter(|name| permitted.contains(name))
            .collect();
        params.insert(layers_param, filtered.join(","));
    }
}
