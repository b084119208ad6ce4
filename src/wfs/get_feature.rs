//! WFS GetFeature response filtering, for GML and GeoJSON output.

use serde_json::Value;
use xmltree::XMLNode;

use crate::ogc::names::{clean_attribute_name, clean_layer_name};
use crate::ogc::xml::{self, XmlError};
use crate::permissions::WfsPermissionSet;

const GML_NS: &str = "http://www.opengis.net/gml";

/// Filter a GML feature collection.
///
/// `internal_url` is the backend URL the request was forwarded to (without
/// query); it appears in the advertised schema location and is replaced with
/// the public service URL.
pub fn filter_gml(
    body: &str,
    internal_url: &str,
    service_url: &str,
    permissions: &WfsPermissionSet,
) -> Result<String, XmlError> {
    let mut root = xml::parse(body)?;

    if let Some(schema_location) = root.attributes.get("schemaLocation").cloned() {
        root.attributes.insert(
            "schemaLocation".to_string(),
            schema_location.replace(internal_url, service_url),
        );
    }

    for member in
        xml::child_elements_mut(&mut root).filter(|el| el.name == "featureMember")
    {
        let mut kept = Vec::new();
        for node in std::mem::take(&mut member.children) {
            let mut feature = match node {
                XMLNode::Element(el) => el,
                other => {
                    kept.push(other);
                    continue;
                }
            };
            let typename = clean_layer_name(&feature.name);
            let Some(permission) = permissions.layer(&typename) else {
                continue;
            };
            let permitted = permission.cleaned_attributes();
            xml::retain_child_elements(&mut feature, |attr| {
                if attr.name == "boundedBy" && attr.namespace.as_deref() == Some(GML_NS) {
                    return true;
                }
                let attr_name = clean_attribute_name(&attr.name);
                attr_name == "geometry" || permitted.contains(&attr_name)
            });
            kept.push(XMLNode::Element(feature));
        }
        member.children = kept;
    }

    // some GML consumers fail on self-closed property tags
    xml::serialize_long_empty(&root)
}

/// Filter a GeoJSON feature collection, preserving property order.
pub fn filter_geojson(body: &str, permissions: &WfsPermissionSet) -> Result<String, serde_json::Error> {
    let mut collection: Value = serde_json::from_str(&xml::strip_control_chars(body))?;

    if let Some(Value::Array(features)) = collection.get_mut("features") {
        features.retain_mut(|feature| {
            let id = feature
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            // drop the feature number to get the type name
            let typename = match id.rsplit_once('.') {
                Some((prefix, _)) => clean_layer_name(prefix),
                None => String::new(),
            };
            let Some(permission) = permissions.layer(&typename) else {
                return false;
            };
            let permitted = permission.cleaned_attributes();
            if let Some(Value::Object(properties)) = feature.get_mut("properties") {
                properties.retain(|name, _| permitted.contains(&clean_attribute_name(name)));
            }
            true
        });
    }

    serde_json::to_string(&collection)
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

    const GML: &str = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:qgs="http://www.qgis.org/gml" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="http://www.qgis.org/gml http://backend:8001/ows/qwc_demo?SERVICE=WFS&amp;REQUEST=DescribeFeatureType">
  <gml:featureMember>
    <qgs:edit_points fid="edit_points.1">
      <gml:boundedBy><gml:Box><gml:coordinates>0,0 1,1</gml:coordinates></gml:Box></gml:boundedBy>
      <qgs:geometry><gml:Point><gml:pos>1 2</gml:pos></gml:Point></qgs:geometry>
      <qgs:name>point one</qgs:name>
      <qgs:internal_id>42</qgs:internal_id>
      <qgs:remark></qgs:remark>
    </qgs:edit_points>
  </gml:featureMember>
  <gml:featureMember>
    <qgs:secret_layer fid="secret_layer.1">
      <qgs:code>classified</qgs:code>
    </qgs:secret_layer>
  </gml:featureMember>
</wfs:FeatureCollection>"#;

    #[test]
    fn gml_features_and_attributes_are_filtered() {
        let out = filter_gml(
            GML,
            "http://backend:8001/ows/qwc_demo",
            "http://proxy/ows/qwc_demo",
            &permissions(),
        )
        .unwrap();
        let root = xml::parse(&out).unwrap();

        let members: Vec<_> = xml::child_elements(&root)
            .filter(|el| el.name == "featureMember")
            .collect();
        assert_eq!(members.len(), 2);
        assert_eq!(xml::child_elements(members[1]).count(), 0);

        let feature = members[0].get_child("edit_points").unwrap();
        let children: Vec<&str> = xml::child_elements(feature)
            .map(|el| el.name.as_str())
            .collect();
        assert_eq!(children, vec!["boundedBy", "geometry", "name"]);
    }

    #[test]
    fn gml_schema_location_points_at_the_proxy() {
        let out = filter_gml(
            GML,
            "http://backend:8001/ows/qwc_demo",
            "http://proxy/ows/qwc_demo",
            &permissions(),
        )
            .unwrap();
        assert!(out.contains("http://proxy/ows/qwc_demo?SERVICE=WFS"), "{}", out);
        assert!(!out.contains("backend:8001"), "{}", out);
    }

    #[test]
    fn gml_empty_elements_are_not_self_closed() {
        let doc = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:qgs="http://www.qgis.org/gml">
  <gml:featureMember>
    <qgs:edit_points fid="edit_points.1"><qgs:name></qgs:name></qgs:edit_points>
  </gml:featureMember>
</wfs:FeatureCollection>"#;
        let out = filter_gml(doc, "http://backend", "http://proxy", &permissions()).unwrap();
        assert!(out.contains("></"), "{}", out);
        assert!(!out.contains("<qgs:name/>"), "{}", out);
    }

    #[test]
    fn geojson_features_and_properties_are_filtered() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": "edit_points.1",
                    "properties": {"name": "point one", "internal_id": 42},
                    "geometry": {"type": "Point", "coordinates": [1, 2]}
                },
                {
                    "type": "Feature",
                    "id": "secret_layer.1",
                    "properties": {"code": "classified"},
                    "geometry": null
                }
            ]
        }"#;
        let out = filter_geojson(body, &permissions()).unwrap();
        let collection: Value = serde_json::from_str(&out).unwrap();
        let features = collection["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["id"], "edit_points.1");
        assert_eq!(
            features[0]["properties"],
            serde_json::json!({"name": "point one"})
        );
    }
}
