//! GetCapabilities and GetProjectSettings response filtering.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;
use xmltree::{Element, XMLNode};

use crate::ogc::xml::{self, XmlError};
use crate::permissions::WmsPermissionSet;

/// Target location for rewritten backend URLs: scheme, authority and path,
/// with query strings preserved from the rewritten URL.
struct UrlTarget {
    scheme: String,
    authority: String,
    path: String,
}

impl UrlTarget {
    /// Parse an override URL, borrowing scheme and authority from the request
    /// origin when the override is protocol-relative or a bare path.
    fn resolve(new_url: &str, origin: &str) -> Self {
        let (fallback_scheme, fallback_authority) = match Url::parse(origin) {
            Ok(url) => (url.scheme().to_string(), url.authority().to_string()),
            Err(_) => (String::new(), String::new()),
        };

        let (scheme, rest) = match new_url.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => match new_url.strip_prefix("//") {
                Some(rest) => (fallback_scheme.clone(), rest),
                None => {
                    return Self {
                        scheme: fallback_scheme,
                        authority: fallback_authority,
                        path: new_url.to_string(),
                    }
                }
            },
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self {
            scheme,
            authority,
            path,
        }
    }

    /// Swap scheme, authority and path of an absolute URL, keeping its query.
    /// The MAP query parameter addresses backend project files and is dropped.
    /// Returns `None` for non-HTTP URLs, which stay untouched.
    fn apply(&self, href: &str, drop_map_param: bool) -> Option<String> {
        let url = Url::parse(href).ok()?;
        if !url.scheme().starts_with("http") {
            return None;
        }
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(
                url.query_pairs()
                    .filter(|(key, _)| !(drop_map_param && key.eq_ignore_ascii_case("map"))),
            )
            .finish();
        let mut rewritten = format!("{}://{}{}", self.scheme, self.authority, self.path);
        if !query.is_empty() {
            rewritten.push('?');
            rewritten.push_str(&query);
        }
        Some(rewritten)
    }
}

/// Filter a capabilities document against the permission set and point all
/// advertised URLs back at the proxy.
pub fn filter_capabilities(
    body: &str,
    permissions: &WmsPermissionSet,
    origin: &str,
    script_root: &str,
) -> Result<String, XmlError> {
    let mut root = xml::parse(body)?;

    let service_url = match &permissions.online_resources.service {
        Some(url) => url.clone(),
        None => {
            // default online resource from request URL parts
            let authority = Url::parse(origin)
                .map(|url| url.authority().to_string())
                .unwrap_or_default();
            format!(
                "//{}{}/{}",
                authority,
                script_root.trim_end_matches('/'),
                permissions.service_name
            )
        }
    };

    let service_target = UrlTarget::resolve(&service_url, origin);
    update_schema_location(&mut root, &service_target);
    update_online_resources(&mut root, &service_target, |_| true);

    if let Some(info_url) = &permissions.online_resources.feature_info {
        let target = UrlTarget::resolve(info_url, origin);
        if let Some(info) = xml::find_descendant_mut(&mut root, "GetFeatureInfo") {
            update_online_resources(info, &target, |_| true);
        }
    }

    if let Some(legend_url) = &permissions.online_resources.legend {
        let target = UrlTarget::resolve(legend_url, origin);
        update_online_resources(&mut root, &target, |path| {
            path.iter()
                .any(|name| name == "LegendURL" || name == "GetLegendGraphic")
        });
    }

    inject_missing_legend_urls(&mut root);

    let capability_exists = root.get_child("Capability").and_then(|c| c.get_child("Layer")).is_some();
    if capability_exists {
        // remove broken info format
        if let Some(info) = xml::find_descendant_mut(&mut root, "GetFeatureInfo") {
            xml::retain_child_elements(info, |child| {
                child.name != "Format"
                    || child.get_text().as_deref() != Some("application/vnd.ogc.gml/3.1.1")
            });
        }

        let capability = root
            .get_mut_child("Capability")
            .and_then(|c| c.get_mut_child("Layer"));
        if let Some(root_layer) = capability {
            filter_layer_tree(root_layer, permissions);
            let queryable = if permissions.queryable_layers.is_empty() {
                "0"
            } else {
                "1"
            };
            root_layer
                .attributes
                .insert("queryable".to_string(), queryable.to_string());
        }

        if let Some(drawing_order) = xml::find_descendant_mut(&mut root, "LayerDrawingOrder") {
            if let Some(text) = drawing_order.get_text().map(|t| t.into_owned()) {
                let filtered: Vec<&str> = text
                    .split(',')
                    .filter(|name| permissions.is_public_layer(name))
                    .collect();
                let filtered = filtered.join(",");
                drawing_order.children = vec![XMLNode::Text(filtered)];
            }
        }

        filter_composer_templates(&mut root, permissions);
        filter_wfs_layers(&mut root, permissions);
    }

    xml::serialize(&root)
}

/// Rewrite the GetSchemaExtension URL inside the root xsi:schemaLocation.
fn update_schema_location(root: &mut Element, target: &UrlTarget) {
    static SCHEMA_EXTENSION_URL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(https?://[^\s]*REQUEST=GetSchemaExtension[^\s]*)").unwrap()
    });

    let Some(schema_location) = root.attributes.get("schemaLocation").cloned() else {
        return;
    };
    let Some(found) = SCHEMA_EXTENSION_URL.find(&schema_location) else {
        return;
    };
    let trimmed_target = UrlTarget {
        scheme: target.scheme.clone(),
        authority: target.authority.clone(),
        path: target.path.trim_end_matches('/').to_string(),
    };
    if let Some(rewritten) = trimmed_target.apply(found.as_str(), false) {
        root.attributes.insert(
            "schemaLocation".to_string(),
            schema_location.replace(found.as_str(), &rewritten),
        );
    }
}

/// Rewrite hrefs of all OnlineResource elements whose ancestor path matches.
fn update_online_resources(
    el: &mut Element,
    target: &UrlTarget,
    section: impl Fn(&[String]) -> bool + Copy,
) {
    fn walk(
        el: &mut Element,
        path: &mut Vec<String>,
        target: &UrlTarget,
        section: &(impl Fn(&[String]) -> bool + Copy),
    ) {
        if el.name == "OnlineResource" && section(path.as_slice()) {
            if let Some(href) = el.attributes.get("href") {
                if let Some(rewritten) = target.apply(href, true) {
                    el.attributes.insert("href".to_string(), rewritten);
                }
            }
        }
        path.push(el.name.clone());
        for node in el.children.iter_mut() {
            if let XMLNode::Element(child) = node {
                walk(child, path, target, section);
            }
        }
        path.pop();
    }
    walk(el, &mut Vec::new(), target, &section);
}

/// The backend omits LegendURL entries for group layers. Clone the first
/// advertised legend online resource and substitute the LAYER query value.
fn inject_missing_legend_urls(root: &mut Element) {
    let reference = xml::find_descendant(root, "LegendURL")
        .and_then(|legend| legend.get_child("OnlineResource"))
        .and_then(|resource| resource.attributes.get("href"))
        .and_then(|href| Url::parse(href).ok());
    let Some(reference) = reference else {
        return;
    };
    let reference_format: String = reference
        .query_pairs()
        .find(|(key, _)| key == "FORMAT")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| "image/png".to_string());

    xml::visit_named_mut(root, "Layer", &mut |layer| {
        let Some(layer_name) = xml::child_text(layer, "Name") else {
            return;
        };
        if layer.get_child("Style").is_none() {
            let mut style = Element::new("Style");
            for (name, text) in [("Name", "default"), ("Title", "default")] {
                let mut child = Element::new(name);
                child.children.push(XMLNode::Text(text.to_string()));
                style.children.push(XMLNode::Element(child));
            }
            layer.children.push(XMLNode::Element(style));
        }
        let style = layer
            .get_mut_child("Style")
            .expect("style element was just ensured");
        if style.get_child("LegendURL").is_some() {
            return;
        }

        let mut legend_href = reference.clone();
        let query: Vec<(String, String)> = reference
            .query_pairs()
            .map(|(key, value)| {
                if key == "LAYER" {
                    (key.into_owned(), layer_name.clone())
                } else {
                    (key.into_owned(), value.into_owned())
                }
            })
            .collect();
        legend_href.query_pairs_mut().clear().extend_pairs(&query);

        let mut format = Element::new("Format");
        format
            .children
            .push(XMLNode::Text(reference_format.clone()));
        let mut resource = Element::new("OnlineResource");
        resource
            .attributes
            .insert("href".to_string(), legend_href.to_string());
        resource
            .attributes
            .insert("type".to_string(), "simple".to_string());
        let mut legend = Element::new("LegendURL");
        legend.children.push(XMLNode::Element(format));
        legend.children.push(XMLNode::Element(resource));
        style.children.push(XMLNode::Element(legend));
    });
}

/// Remove non-permitted layers and attributes below a layer element.
fn filter_layer_tree(el: &mut Element, permissions: &WmsPermissionSet) {
    let children = std::mem::take(&mut el.children);
    for node in children {
        match node {
            XMLNode::Element(mut child) if child.name == "Layer" => {
                let layer_name = xml::child_text(&child, "Name").unwrap_or_default();
                if !permissions.is_public_layer(&layer_name) {
                    continue;
                }
                let queryable = if permissions.queryable_layers.contains(&layer_name) {
                    "1"
                } else {
                    "0"
                };
                child
                    .attributes
                    .insert("queryable".to_string(), queryable.to_string());

                let permitted_attributes: BTreeSet<&str> = permissions
                    .permitted_layers
                    .get(&layer_name)
                    .map(|perm| perm.attribute_names())
                    .unwrap_or_default();

                // project settings carry attribute metadata per layer
                if let Some(display_field) = child.attributes.get("displayField") {
                    if !permitted_attributes.contains(display_field.as_str()) {
                        child.attributes.remove("displayField");
                    }
                }
                if let Some(attributes) = child.get_mut_child("Attributes") {
                    xml::retain_child_elements(attributes, |attr| {
                        attr.name != "Attribute"
                            || attr
                                .attributes
                                .get("name")
                                .map_or(false, |name| permitted_attributes.contains(name.as_str()))
                    });
                }

                filter_layer_tree(&mut child, permissions);
                el.children.push(XMLNode::Element(child));
            }
            other => el.children.push(other),
        }
    }
}

/// Drop non-permitted print templates, and the whole ComposerTemplates
/// element once empty.
fn filter_composer_templates(root: &mut Element, permissions: &WmsPermissionSet) {
    let Some(capability) = root.get_mut_child("Capability") else {
        return;
    };
    let mut now_empty = false;
    if let Some(templates) = capability.get_mut_child("ComposerTemplates") {
        xml::retain_child_elements(templates, |template| {
            template.name != "ComposerTemplate"
                || template
                    .attributes
                    .get("name")
                    .map_or(false, |name| permissions.print_templates.contains(name))
        });
        now_empty = templates.get_child("ComposerTemplate").is_none();
    }
    if now_empty {
        xml::retain_child_elements(capability, |child| child.name != "ComposerTemplates");
    }
}

/// Restrict the project settings WFSLayers list to layers with edit grants.
fn filter_wfs_layers(root: &mut Element, permissions: &WmsPermissionSet) {
    if let Some(wfs_layers) = xml::find_descendant_mut(root, "WFSLayers") {
        xml::retain_child_elements(wfs_layers, |layer| {
            layer.name != "WFSLayer"
                || layer
                    .attributes
                    .get("name")
                    .map_or(false, |name| permissions.edit_layers.contains(name))
        });
    }
}
