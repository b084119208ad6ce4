//! Name cleaning applied by the backend WFS to layer and attribute names.
//!
//! WFS documents report layer/attribute names with special characters
//! substituted, since XML tag names cannot contain spaces or colons. Every
//! comparison between a request parameter, a permission key and an
//! XML-tag-derived name must go through the same normalization.

/// Clean a layer name the way the backend reports it in WFS documents.
pub fn clean_layer_name(layer_name: &str) -> String {
    layer_name.replace(' ', "_").replace(':', "-")
}

/// Clean an attribute name the way the backend reports it in WFS documents.
///
/// Spaces become underscores, then all characters outside word/dot/dash/
/// underscore are stripped (Unicode letters and digits are word characters).
pub fn clean_attribute_name(attribute_name: &str) -> String {
    attribute_name
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}
