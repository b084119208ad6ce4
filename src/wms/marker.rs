//! MARKER highlight parameter: parse `KEY->VALUE|KEY->VALUE`, validate
//! against the configured type schema and render the symbol template into
//! HIGHLIGHT_GEOM / HIGHLIGHT_SYMBOL.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ResolvedMarkerParam;
use crate::error::OwsException;
use crate::ogc::Params;

static COLOR_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").unwrap());

/// Apply a requested MARKER to the highlight parameters. The resulting
/// payload can exceed URL length limits, so callers must force POST.
pub fn apply_marker(
    params: &mut Params,
    marker: &str,
    template: &str,
    schema: &BTreeMap<String, ResolvedMarkerParam>,
) -> Result<(), OwsException> {
    let mut requested: BTreeMap<String, String> = BTreeMap::new();
    for pair in marker.split('|') {
        let Some((key, value)) = pair.split_once("->") else {
            return Err(OwsException::bad_request(format!(
                "Invalid MARKER param entry '{}'",
                pair
            )));
        };
        requested.insert(key.to_string(), value.to_string());
    }

    if !requested.contains_key("X") || !requested.contains_key("Y") {
        return Err(OwsException::bad_request(
            "Both X and Y need to be specified in MARKER param",
        ));
    }

    let mut rendered = template.to_string();
    let mut keys: Vec<&String> = requested.keys().collect();
    keys.extend(schema.keys().filter(|k| !requested.contains_key(*k)));

    for key in keys {
        let configured = schema.get(key);
        let mut value = requested
            .get(key)
            .cloned()
            .or_else(|| configured.and_then(|p| p.value.clone()))
            .unwrap_or_default();
        let param_type = configured.map(|p| p.param_type.as_str());

        match param_type {
            Some("number") => {
                if value.parse::<f64>().is_err() {
                    return Err(bad_value(key, &value, "number"));
                }
            }
            Some("color") => {
                if !COLOR_PAT.is_match(&value) {
                    return Err(bad_value(key, &value, "color"));
                }
                value = format!("#{}", value);
            }
            Some("string") => {}
            _ => {
                return Err(OwsException::bad_request(format!(
                    "Unknown parameter type {} in MARKER param {} configuration",
                    param_type.unwrap_or("<unset>"),
                    key
                )));
            }
        }

        rendered = rendered.replace(&format!("${}$", key), &value);
    }

    let geom = format!("POINT ({} {})", requested["X"], requested["Y"]);
    append_joined(params, "HIGHLIGHT_GEOM", &geom);
    append_joined(params, "HIGHLIGHT_SYMBOL", &rendered);
    Ok(())
}

fn bad_value(key: &str, value: &str, expected: &str) -> OwsException {
    OwsException::bad_request(format!(
        "Bad value for MARKER param {} (value: {}, expected to be a: {})",
        key, value, expected
    ))
}

fn append_joined(params: &mut Params, key: &str, value: &str) {
    let joined = match params.get(key) {
        Some(existing) if !existing.is_empty() => format!("{};{}", existing, value),
        _ => value.to_string(),
    };
    params.insert(key.to_string(), joined);
}
