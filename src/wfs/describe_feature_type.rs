//! WFS DescribeFeatureType response filtering.

use std::collections::BTreeMap;

use xmltree::XMLNode;

use crate::ogc::names::{clean_attribute_name, clean_layer_name};
use crate::ogc::xml::{self, XmlError};
use crate::permissions::WfsPermissionSet;

/// Filter an XSD schema document: drop non-permitted feature types and
/// restrict each complex type's attribute sequence.
pub fn filter_describe_feature_type(
    body: &str,
    permissions: &WfsPermissionSet,
) -> Result<String, XmlError> {
    let mut root = xml::parse(body)?;

    // these namespaces only appear inside attribute values, re-declare them
    root.attributes
        .insert("xmlns:qgs".to_string(), "http://www.qgis.org/gml".to_string());
    root.attributes
        .insert("xmlns:gml".to_string(), "http://www.opengis.net/gml".to_string());

    // top-level elements bind type names to layer names
    let mut complex_type_map: BTreeMap<String, String> = BTreeMap::new();
    for element in xml::child_elements(&root).filter(|el| el.name == "element") {
        let Some(name) = element.attributes.get("name") else {
            continue;
        };
        let typename = clean_layer_name(name);
        if let Some(complex_typename) = element.attributes.get("type") {
            let complex_typename = complex_typename
                .strip_prefix("qgs:")
                .unwrap_or(complex_typename);
            complex_type_map.insert(complex_typename.to_string(), typename);
        }
    }

    xml::retain_child_elements(&mut root, |el| {
        el.name != "element"
            || el
                .attributes
                .get("name")
                .map_or(false, |name| permissions.is_permitted(&clean_layer_name(name)))
    });

    let mut kept = Vec::new();
    for node in std::mem::take(&mut root.children) {
        let mut complex_type = match node {
            XMLNode::Element(el) if el.name == "complexType" => el,
            other => {
                kept.push(other);
                continue;
            }
        };
        let typename = complex_type
            .attributes
            .get("name")
            .and_then(|name| complex_type_map.get(name));
        let Some(typename) = typename else {
            // unknown type, leave untouched
            kept.push(XMLNode::Element(complex_type));
            continue;
        };
        let Some(permission) = permissions.layer(typename) else {
            continue;
        };
        let permitted = permission.cleaned_attributes();
        if let Some(sequence) = xml::find_descendant_mut(&mut complex_type, "sequence") {
            xml::retain_child_elements(sequence, |el| {
                if el.name != "element" {
                    return true;
                }
                let attr_name = el
                    .attributes
                    .get("name")
                    .map(|name| clean_attribute_name(name))
                    .unwrap_or_default();
                attr_name == "geometry" || permitted.contains(&attr_name)
            });
        }
        kept.push(XMLNode::Element(complex_type));
    }
    root.children = kept;

    xml::serialize(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::WfsLayerPermission;

    fn permissions() -> WfsPermissionSet {
        let mut set = WfsPermissionSet::default();
        set.permitted_layers.insert(
            "edit_points".to_string(),
            WfsLayerPermission {
                raw_name: "edit_points".to_string(),
                attributes: vec![("name".to_string(), "Name".to_string())],
                readable: true,
                ..WfsLayerPermission::default()
            },
        );
        set
    }

    const SCHEMA: &str = r#"<schema xmlns="http://www.w3.org/2001/XMLSchema" xmlns:qgs="http://www.qgis.org/gml" targetNamespace="http://www.qgis.org/gml">
  <element name="edit_points" type="qgs:edit_pointsType"/>
  <element name="secret_layer" type="qgs:secret_layerType"/>
  <complexType name="edit_pointsType">
    <complexContent>
      <extension>
        <sequence>
          <element name="geometry"/>
          <element name="name"/>
          <element name="internal_id"/>
        </sequence>
      </extension>
    </complexContent>
  </complexType>
  <complexType name="secret_layerType">
    <complexContent>
      <extension>
        <sequence>
          <element name="code"/>
        </sequence>
      </extension>
    </complexContent>
  </complexType>
</schema>"#;

    #[test]
    fn non_permitted_types_are_removed() {
        let out = filter_describe_feature_type(SCHEMA, &permissions()).unwrap();
        let root = xml::parse(&out).unwrap();
        let elements: Vec<&str> = xml::child_elements(&root)
            .filter(|el| el.name == "element")
            .filter_map(|el| el.attributes.get("name").map(String::as_str))
            .collect();
        assert_eq!(elements, vec!["edit_points"]);
        let types: Vec<&str> = xml::child_elements(&root)
            .filter(|el| el.name == "complexType")
            .filter_map(|el| el.attributes.get("name").map(String::as_str))
            .collect();
        assert_eq!(types, vec!["edit_pointsType"]);
    }

    #[test]
    fn sequence_attributes_are_filtered_keeping_geometry() {
        let out = filter_describe_feature_type(SCHEMA, &permissions()).unwrap();
        let root = xml::parse(&out).unwrap();
        let sequence = xml::find_descendant(&root, "sequence").unwrap();
        let names: Vec<&str> = xml::child_elements(sequence)
            .filter_map(|el| el.attributes.get("name").map(String::as_str))
            .collect();
        assert_eq!(names, vec!["geometry", "name"]);
    }

    #[test]
    fn namespace_declarations_are_reapplied() {
        let out = filter_describe_feature_type(SCHEMA, &permissions()).unwrap();
        assert!(out.contains("xmlns:qgs=\"http://www.qgis.org/gml\""));
        assert!(out.contains("xmlns:gml=\"http://www.opengis.net/gml\""));
    }
}
