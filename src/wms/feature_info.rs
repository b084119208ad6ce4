//! GetFeatureInfo response filtering.
//!
//! The backend is always queried with INFO_FORMAT=text/xml; the client's
//! requested format is reconstructed here from the filtered tree.

use std::collections::BTreeMap;

use xmltree::{Element, XMLNode};

use crate::error::xml_escape;
use crate::ogc::xml::{self, XmlError};
use crate::permissions::WmsPermissionSet;

/// Filtered feature info payload with its reply content type.
pub struct FeatureInfoResponse {
    pub content_type: &'static str,
    pub body: String,
}

/// Filter a text/xml feature info document and render it in the client's
/// originally requested format.
pub fn filter_feature_info(
    body: &str,
    requested_format: &str,
    permissions: &WmsPermissionSet,
) -> Result<FeatureInfoResponse, XmlError> {
    let mut root = xml::parse(body)?;

    let children = std::mem::take(&mut root.children);
    for node in children {
        match node {
            XMLNode::Element(mut layer) if layer.name == "Layer" => {
                let reported_name = layer
                    .attributes
                    .get("name")
                    .cloned()
                    .unwrap_or_default();
                // results may carry layer titles instead of names
                let layer_name = permissions
                    .layer_name_from_title
                    .get(&reported_name)
                    .cloned()
                    .unwrap_or(reported_name);
                let Some(permission) = permissions.permitted_layers.get(&layer_name) else {
                    continue;
                };
                layer
                    .attributes
                    .insert("name".to_string(), permission.title.clone());

                // QGIS reports attribute display aliases
                let alias_to_name: BTreeMap<&str, &str> = permission
                    .attributes
                    .iter()
                    .map(|(name, alias)| (alias.as_str(), name.as_str()))
                    .collect();
                for feature in xml::child_elements_mut(&mut layer) {
                    if feature.name != "Feature" {
                        continue;
                    }
                    xml::retain_child_elements(feature, |attr| {
                        attr.name != "Attribute"
                            || attr
                                .attributes
                                .get("name")
                                .map_or(false, |name| alias_to_name.contains_key(name.as_str()))
                    });
                }
                root.children.push(XMLNode::Element(layer));
            }
            other => root.children.push(other),
        }
    }

    match requested_format {
        "text/xml" => Ok(FeatureInfoResponse {
            content_type: "text/xml",
            body: xml::serialize(&root)?,
        }),
        "text/plain" => Ok(FeatureInfoResponse {
            content_type: "text/plain",
            body: render_plain(&root),
        }),
        "text/html" => Ok(FeatureInfoResponse {
            content_type: "text/html",
            body: render_html(&root),
        }),
        _ => Ok(FeatureInfoResponse {
            content_type: "text/xml; charset=utf-8",
            body: "<ServiceExceptionReport version=\"1.3.0\">\n \
                   <ServiceException code=\"InvalidFormat\">Unsupported info_format\
                   </ServiceException>\n</ServiceExceptionReport>"
                .to_string(),
        }),
    }
}

fn layers(root: &Element) -> impl Iterator<Item = &Element> {
    xml::child_elements(root).filter(|child| child.name == "Layer")
}

fn attribute(el: &Element, name: &str) -> String {
    el.attributes.get(name).cloned().unwrap_or_default()
}

fn render_plain(root: &Element) -> String {
    let mut text = "GetFeatureInfo results\n\n".to_string();
    for layer in layers(root) {
        text.push_str(&format!("Layer '{}'\n", attribute(layer, "name")));
        for feature in xml::child_elements(layer).filter(|c| c.name == "Feature") {
            text.push_str(&format!("Feature {}\n", attribute(feature, "id")));
            for attr in xml::child_elements(feature).filter(|c| c.name == "Attribute") {
                text.push_str(&format!(
                    "{} = '{}'\n",
                    attribute(attr, "name"),
                    attribute(attr, "value")
                ));
            }
        }
        text.push('\n');
    }
    text
}

fn render_html(root: &Element) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n");
    html.push_str("<head>\n");
    html.push_str("<title>Information</title>\n");
    html.push_str(
        "<meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\" />\n",
    );
    html.push_str("<style>\n");
    html.push_str(
        "  body { font-family: \"Open Sans\", \"Calluna Sans\", \"Gill Sans MT\", \
         \"Calibri\", \"Trebuchet MS\", sans-serif; }\n",
    );
    html.push_str(
        "  table, th, td { width: 100%; border: 1px solid black; border-collapse: collapse; \
         text-align: left; padding: 2px; }\n",
    );
    html.push_str("  th { width: 25%; font-weight: bold; }\n");
    html.push_str("  .layer-title { font-weight: bold; padding: 2px; }\n");
    html.push_str("</style>\n");
    html.push_str("</head>\n");
    html.push_str("<body>\n");
    for layer in layers(root) {
        let features: Vec<&Element> = xml::child_elements(layer)
            .filter(|c| c.name == "Feature")
            .collect();
        if !features.is_empty() {
            html.push_str(&format!(
                "<div class=\"layer-title\">{}</div>\n",
                xml_escape(&attribute(layer, "name"))
            ));
        }
        for feature in features {
            html.push_str("<table>\n");
            for attr in xml::child_elements(feature).filter(|c| c.name == "Attribute") {
                html.push_str(&format!(
                    "<tr><th>{}</th><td>{}</td></tr>\n",
                    xml_escape(&attribute(attr, "name")),
                    xml_escape(&attribute(attr, "value"))
                ));
            }
            html.push_str("</table>\n");
        }
    }
    html.push_str("</body>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::WmsLayerPermission;

    fn permissions() -> WmsPermissionSet {
        let mut set = WmsPermissionSet::default();
        set.permitted_layers.insert(
            "edit_points".to_string(),
            WmsLayerPermission {
                title: "Edit Points".to_string(),
                attributes: vec![
                    ("name".to_string(), "Name".to_string()),
                    ("description".to_string(), "Description".to_string()),
                ],
                queryable: true,
                opacity: None,
            },
        );
        set.layer_name_from_title
            .insert("Edit Points".to_string(), "edit_points".to_string());
        set
    }

    const INFO: &str = r#"<GetFeatureInfoResponse>
  <Layer name="Edit Points">
    <Feature id="1">
      <Attribute name="Name" value="point one"/>
      <Attribute name="Description" value="first"/>
      <Attribute name="internal_id" value="42"/>
    </Feature>
  </Layer>
  <Layer name="secret_layer">
    <Feature id="7">
      <Attribute name="code" value="classified"/>
    </Feature>
  </Layer>
</GetFeatureInfoResponse>"#;

    #[test]
    fn xml_result_drops_layers_and_attributes() {
        let out = filter_feature_info(INFO, "text/xml", &permissions()).unwrap();
        assert_eq!(out.content_type, "text/xml");
        let root = xml::parse(&out.body).unwrap();
        let layers: Vec<&Element> = xml::child_elements(&root).collect();
        assert_eq!(layers.len(), 1);
        assert_eq!(
            layers[0].attributes.get("name").map(String::as_str),
            Some("Edit Points")
        );
        let feature = layers[0].get_child("Feature").unwrap();
        let names: Vec<&str> = xml::child_elements(feature)
            .filter_map(|a| a.attributes.get("name").map(String::as_str))
            .collect();
        assert_eq!(names, vec!["Name", "Description"]);
    }

    #[test]
    fn plain_text_reconstruction() {
        let out = filter_feature_info(INFO, "text/plain", &permissions()).unwrap();
        assert_eq!(out.content_type, "text/plain");
        assert_eq!(
            out.body,
            "GetFeatureInfo results\n\n\
             Layer 'Edit Points'\n\
             Feature 1\n\
             Name = 'point one'\n\
             Description = 'first'\n\n"
        );
    }

    #[test]
    fn html_reconstruction_escapes_values() {
        let doc = r#"<GetFeatureInfoResponse>
  <Layer name="Edit Points">
    <Feature id="1">
      <Attribute name="Name" value="&lt;b&gt;bold&lt;/b&gt;"/>
    </Feature>
  </Layer>
</GetFeatureInfoResponse>"#;
        let out = filter_feature_info(doc, "text/html", &permissions()).unwrap();
        assert_eq!(out.content_type, "text/html");
        assert!(out.body.starts_with("<!DOCTYPE html>\n"));
        assert!(out.body.contains("<div class=\"layer-title\">Edit Points</div>"));
        assert!(out
            .body
            .contains("<tr><th>Name</th><td>&lt;b&gt;bold&lt;/b&gt;</td></tr>"));
    }

    #[test]
    fn layers_without_features_render_no_html_title() {
        let doc = r#"<GetFeatureInfoResponse>
  <Layer name="Edit Points"/>
</GetFeatureInfoResponse>"#;
        let out = filter_feature_info(doc, "text/html", &permissions()).unwrap();
        assert!(!out.body.contains("layer-title"));
    }
}
