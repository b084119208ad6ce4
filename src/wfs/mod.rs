//! WFS request validation, parameter rewriting and response filtering.

pub mod capabilities;
pub mod describe_feature_type;
pub mod get_feature;
pub mod transaction;

use tracing::warn;

use crate::error::OwsException;
use crate::ogc::names::clean_layer_name;
use crate::ogc::{Params, WfsVerb};
use crate::permissions::WfsPermissionSet;

/// Check TYPENAME and FEATUREID parameters against the permission set.
pub fn validate_request(
    params: &Params,
    permissions: &WfsPermissionSet,
) -> Result<(), OwsException> {
    if let Some(typenames) = params.get("TYPENAME") {
        for typename in typenames.split(',') {
            if !typename.is_empty() && !permissions.is_permitted(&clean_layer_name(typename)) {
                return Err(typename_not_permitted(typename));
            }
        }
    }
    if let Some(featureids) = params.get("FEATUREID") {
        for featureid in featureids.split(',') {
            let typename = featureid.split('.').next().unwrap_or("");
            if !typename.is_empty() && !permissions.is_permitted(&clean_layer_name(typename)) {
                return Err(typename_not_permitted(typename));
            }
        }
    }
    Ok(())
}

fn typename_not_permitted(typename: &str) -> OwsException {
    OwsException::new(
        "RequestNotWellFormed",
        format!(
            "TypeName '{}' could not be found or is not permitted",
            typename
        ),
    )
}

/// Rewrite request parameters after validation: version coercion and output
/// format normalization.
pub fn adjust_request(verb: WfsVerb, params: &mut Params) {
    let version = params.get("VERSION").map(String::as_str).unwrap_or("");
    if !["1.0.0", "1.1.0"].contains(&version) {
        // the backend does not reliably support other negotiated versions
        warn!("falling back to WFS 1.1.0");
        params.insert("VERSION".to_string(), "1.1.0".to_string());
    }

    if verb == WfsVerb::GetFeature {
        let requested = params
            .get("OUTPUTFORMAT")
            .map(|f| f.to_lowercase())
            .unwrap_or_default();
        let output_format = match requested.as_str() {
            "gml2" | "text/xml; subtype=gml/2.1.2" => "gml2",
            "gml3" | "text/xml; subtype=gml/3.1.1" => "gml3",
            "geojson"
            | "application/vnd.geo+json"
            | "application/vnd.geo json"
            | "application/geo+json"
            | "application/geo json"
            | "application/json" => "geojson",
            _ => {
                if params.get("VERSION").map(String::as_str) == Some("1.1.0") {
                    "gml3"
                } else {
                    "gml2"
                }
            }
        };
        params.insert("OUTPUTFORMAT".to_string(), output_format.to_string());
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
        set.permitted_layers.insert(
            "ÖV-_Haltestellen".to_string(),
            WfsLayerPermission {
                raw_name: "ÖV: Haltestellen".to_string(),
                readable: true,
                ..WfsLayerPermission::default()
            },
        );
        set
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn typenames_are_checked_after_cleaning() {
        let perms = permissions();
        let p = params(&[("TYPENAME", "edit_points,ÖV: Haltestellen")]);
        assert!(validate_request(&p, &perms).is_ok());

        let p = params(&[("TYPENAME", "secret_layer")]);
        let err = validate_request(&p, &perms).unwrap_err();
        assert_eq!(err.code, "RequestNotWellFormed");
        assert!(err.message.contains("secret_layer"));
    }

    #[test]
    fn featureids_imply_their_layer() {
        let perms = permissions();
        let p = params(&[("FEATUREID", "edit_points.5,edit_points.7")]);
        assert!(validate_request(&p, &perms).is_ok());

        let p = params(&[("FEATUREID", "secret_layer.1")]);
        assert!(validate_request(&p, &perms).is_err());
    }

    #[test]
    fn unsupported_versions_fall_back() {
        let mut p = params(&[("VERSION", "2.0.0")]);
        adjust_request(WfsVerb::GetCapabilities, &mut p);
        assert_eq!(p["VERSION"], "1.1.0");

        let mut p = params(&[("VERSION", "1.0.0")]);
        adjust_request(WfsVerb::GetCapabilities, &mut p);
        assert_eq!(p["VERSION"], "1.0.0");
    }

    #[test]
    fn output_format_aliases_normalize() {
        let mut p = params(&[
            ("VERSION", "1.1.0"),
            ("OUTPUTFORMAT", "application/vnd.geo+json"),
        ]);
        adjust_request(WfsVerb::GetFeature, &mut p);
        assert_eq!(p["OUTPUTFORMAT"], "geojson");

        let mut p = params(&[("VERSION", "1.1.0"), ("OUTPUTFORMAT", "GML2")]);
        adjust_request(WfsVerb::GetFeature, &mut p);
        assert_eq!(p["OUTPUTFORMAT"], "gml2");
    }

    #[test]
    fn output_format_defaults_by_version() {
        let mut p = params(&[("VERSION", "1.1.0")]);
        adjust_request(WfsVerb::GetFeature, &mut p);
        assert_eq!(p["OUTPUTFORMAT"], "gml3");

        let mut p = params(&[("VERSION", "1.0.0")]);
        adjust_request(WfsVerb::GetFeature, &mut p);
        assert_eq!(p["OUTPUTFORMAT"], "gml2");
    }
}
