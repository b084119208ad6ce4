//! GetTranslations response filtering.
//!
//! GetTranslations is served by a backend plugin and returns JSON with layer
//! tree labels, per-layer field labels and print layout labels.

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::permissions::WmsPermissionSet;

/// Filter a translations payload against the permission set. Unparseable
/// payloads degrade to an empty object.
pub fn filter_translations(body: &str, permissions: &WmsPermissionSet) -> Value {
    let Ok(Value::Object(mut translations)) = serde_json::from_str::<Value>(body) else {
        warn!("failed to parse translations, is the backend translations plugin enabled?");
        return json!({});
    };

    for key in ["layertree", "layers"] {
        let filtered = take_object(&mut translations, key)
            .into_iter()
            .filter(|(name, _)| permissions.permitted_layers.contains_key(name))
            .collect::<Map<String, Value>>();
        translations.insert(key.to_string(), Value::Object(filtered));
    }

    if let Some(Value::Object(layers)) = translations.get_mut("layers") {
        for (layer_name, entry) in layers.iter_mut() {
            let Some(permission) = permissions.permitted_layers.get(layer_name) else {
                continue;
            };
            let aliases = permission.aliases();
            if let Value::Object(entry) = entry {
                let fields = take_object(entry, "fields")
                    .into_iter()
                    .filter(|(field, _)| aliases.contains(field.as_str()))
                    .collect::<Map<String, Value>>();
                entry.insert("fields".to_string(), Value::Object(fields));
            }
        }
    }

    if let Some(Value::Object(layouts)) = translations.get_mut("layouts") {
        layouts.retain(|name, _| permissions.print_templates.contains(name));
    }

    Value::Object(translations)
}

fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    }
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
                attributes: vec![("name".to_string(), "Name".to_string())],
                queryable: true,
                opacity: None,
            },
        );
        set.print_templates = vec!["A4 Landscape".to_string()];
        set
    }

    #[test]
    fn layers_fields_and_layouts_are_filtered() {
        let body = r#"{
            "layertree": {"edit_points": "Punkte", "secret": "Geheim"},
            "layers": {
                "edit_points": {"fields": {"Name": "Name DE", "internal": "Intern"}},
                "secret": {"fields": {"code": "Code"}}
            },
            "layouts": {"A4 Landscape": "A4 quer", "A3 Landscape": "A3 quer"}
        }"#;
        let filtered = filter_translations(body, &permissions());
        assert_eq!(filtered["layertree"], json!({"edit_points": "Punkte"}));
        assert_eq!(
            filtered["layers"],
            json!({"edit_points": {"fields": {"Name": "Name DE"}}})
        );
        assert_eq!(filtered["layouts"], json!({"A4 Landscape": "A4 quer"}));
    }

    #[test]
    fn missing_sections_become_empty_objects() {
        let filtered = filter_translations("{}", &permissions());
        assert_eq!(filtered["layertree"], json!({}));
        assert_eq!(filtered["layers"], json!({}));
        assert!(filtered.get("layouts").is_none());
    }

    #[test]
    fn unparseable_payload_degrades_to_empty_object() {
        assert_eq!(filter_translations("<html>oops</html>", &permissions()), json!({}));
    }
}
