//! WFS GetCapabilities response filtering.

use xmltree::Element;

use crate::ogc::names::clean_layer_name;
use crate::ogc::xml::{self, XmlError};
use crate::permissions::WfsPermissionSet;

const OWS_NS: &str = "http://www.opengis.net/ows";
const WFS_NS: &str = "http://www.opengis.net/wfs";

/// Filter a WFS capabilities document: point the advertised endpoints at the
/// proxy and restrict the feature type list to permitted layers.
pub fn filter_capabilities(
    body: &str,
    version: &str,
    service_url: &str,
    permissions: &WfsPermissionSet,
) -> Result<String, XmlError> {
    let mut root = xml::parse(body)?;

    if version == "1.1.0" {
        // 1.1.0 capabilities carry ows:Get/ows:Post with xlink hrefs
        rewrite_endpoints(&mut root, OWS_NS, "href", service_url);
    } else {
        rewrite_endpoints(&mut root, WFS_NS, "onlineResource", service_url);
    }

    if let Some(feature_types) = xml::find_descendant_mut(&mut root, "FeatureTypeList") {
        xml::retain_child_elements(feature_types, |feature_type| {
            if feature_type.name != "FeatureType" {
                return true;
            }
            let name = xml::child_text(feature_type, "Name").unwrap_or_default();
            permissions.is_permitted(&clean_layer_name(&name))
        });
    }

    xml::serialize(&root)
}

fn rewrite_endpoints(root: &mut Element, namespace: &str, attribute: &str, service_url: &str) {
    for name in ["Get", "Post"] {
        xml::visit_named_mut(root, name, &mut |el| {
            if el.namespace.as_deref() == Some(namespace) {
                el.attributes
                    .insert(attribute.to_string(), service_url.to_string());
            }
        });
    }
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
                readable: true,
                ..WfsLayerPermission::default()
            },
        );
        set
    }

    const CAPABILITIES_110: &str = r#"<WFS_Capabilities xmlns="http://www.opengis.net/wfs" xmlns:ows="http://www.opengis.net/ows" xmlns:xlink="http://www.w3.org/1999/xlink" version="1.1.0">
  <ows:OperationsMetadata>
    <ows:Operation name="GetFeature">
      <ows:DCP><ows:HTTP>
        <ows:Get xlink:href="http://backend:8001/ows/qwc_demo"/>
        <ows:Post xlink:href="http://backend:8001/ows/qwc_demo"/>
      </ows:HTTP></ows:DCP>
    </ows:Operation>
  </ows:OperationsMetadata>
  <FeatureTypeList>
    <FeatureType><Name>edit_points</Name></FeatureType>
    <FeatureType><Name>secret_layer</Name></FeatureType>
  </FeatureTypeList>
</WFS_Capabilities>"#;

    #[test]
    fn endpoints_point_at_the_proxy() {
        let out = filter_capabilities(
            CAPABILITIES_110,
            "1.1.0",
            "http://proxy/ows/qwc_demo",
            &permissions(),
        )
        .unwrap();
        let root = xml::parse(&out).unwrap();
        let get = xml::find_descendant(&root, "Get").unwrap();
        assert_eq!(
            get.attributes.get("href").map(String::as_str),
            Some("http://proxy/ows/qwc_demo")
        );
    }

    #[test]
    fn feature_types_are_restricted() {
        let out = filter_capabilities(
            CAPABILITIES_110,
            "1.1.0",
            "http://proxy/ows/qwc_demo",
            &permissions(),
        )
        .unwrap();
        let root = xml::parse(&out).unwrap();
        let list = xml::find_descendant(&root, "FeatureTypeList").unwrap();
        let names: Vec<String> = xml::child_elements(list)
            .filter_map(|ft| xml::child_text(ft, "Name"))
            .collect();
        assert_eq!(names, vec!["edit_points"]);
    }

    #[test]
    fn wfs_100_uses_online_resource_attribute() {
        let doc = r#"<WFS_Capabilities xmlns="http://www.opengis.net/wfs" version="1.0.0">
  <Capability><Request><GetFeature>
    <DCPType><HTTP><Get onlineResource="http://backend:8001/ows/qwc_demo"/></HTTP></DCPType>
  </GetFeature></Request></Capability>
  <FeatureTypeList/>
</WFS_Capabilities>"#;
        let out =
            filter_capabilities(doc, "1.0.0", "http://proxy/ows/qwc_demo", &permissions())
                .unwrap();
        let root = xml::parse(&out).unwrap();
        let get = xml::find_descendant(&root, "Get").unwrap();
        assert_eq!(
            get.attributes.get("onlineResource").map(String::as_str),
            Some("http://proxy/ows/qwc_demo")
        );
    }
}
