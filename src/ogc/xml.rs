//! Thin helpers over the XML element tree used by the response filters.

use xmltree::{Element, EmitterConfig, XMLNode};

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] xmltree::ParseError),
    #[error("XML write error: {0}")]
    Write(#[from] xmltree::Error),
}

/// Strip characters that are illegal in XML 1.0 documents.
///
/// The backend occasionally emits control characters in attribute data.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(c,
                '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
        })
        .collect()
}

/// Parse an XML document after stripping illegal control characters.
pub fn parse(text: &str) -> Result<Element, XmlError> {
    Ok(Element::parse(strip_control_chars(text).as_bytes())?)
}

/// Serialize a document with an XML declaration and self-closed empty tags.
pub fn serialize(root: &Element) -> Result<String, XmlError> {
    write_document(root, true)
}

/// Serialize a document without collapsing empty elements (`<a></a>`).
///
/// GML consumers exist that fail on self-closed property tags.
pub fn serialize_long_empty(root: &Element) -> Result<String, XmlError> {
    write_document(root, false)
}

fn write_document(root: &Element, normalize_empty: bool) -> Result<String, XmlError> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false)
        .normalize_empty_elements(normalize_empty);
    root.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Iterate the element children of a node.
pub fn child_elements(el: &Element) -> impl Iterator<Item = &Element> {
    el.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

/// Iterate the element children of a node mutably.
pub fn child_elements_mut(el: &mut Element) -> impl Iterator<Item = &mut Element> {
    el.children.iter_mut().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

/// Keep only element children matching the predicate; other node kinds stay.
pub fn retain_child_elements(el: &mut Element, mut pred: impl FnMut(&Element) -> bool) {
    el.children.retain(|node| match node {
        XMLNode::Element(child) => pred(child),
        _ => true,
    });
}

/// Visit every descendant element with the given local name, depth first.
pub fn visit_named_mut(el: &mut Element, name: &str, f: &mut impl FnMut(&mut Element)) {
    if el.name == name {
        f(el);
    }
    for node in el.children.iter_mut() {
        if let XMLNode::Element(child) = node {
            visit_named_mut(child, name, f);
        }
    }
}

/// Visit every descendant element, depth first, parents before children.
pub fn visit_all_mut(el: &mut Element, f: &mut impl FnMut(&mut Element)) {
    f(el);
    for node in el.children.iter_mut() {
        if let XMLNode::Element(child) = node {
            visit_all_mut(child, f);
        }
    }
}

/// Find the first descendant element with the given local name.
pub fn find_descendant<'a>(el: &'a Element, name: &str) -> Option<&'a Element> {
    for child in child_elements(el) {
        if child.name == name {
            return Some(child);
        }
        if let Some(found) = find_descendant(child, name) {
            return Some(found);
        }
    }
    None
}

/// Find the first descendant element with the given local name, mutably.
pub fn find_descendant_mut<'a>(el: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    for node in el.children.iter_mut() {
        if let XMLNode::Element(child) = node {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = find_descendant_mut(child, name) {
                return Some(found);
            }
        }
    }
    None
}

/// Trimmed text content of the first child element with the given name.
pub fn child_text<'a>(el: &'a Element, name: &str) -> Option<String> {
    el.get_child(name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
}

/// Structural comparison ignoring attribute order and inter-element whitespace.
/// Used by tests to diff filtered documents against expectations.
pub fn structurally_equal(a: &Element, b: &Element) -> bool {
    if a.name != b.name || a.namespace != b.namespace || a.attributes != b.attributes {
        return false;
    }
    let text_a = a.get_text().map(|t| t.trim().to_string()).unwrap_or_default();
    let text_b = b.get_text().map(|t| t.trim().to_string()).unwrap_or_default();
    if text_a != text_b {
        return false;
    }
    let children_a: Vec<_> = child_elements(a).collect();
    let children_b: Vec<_> = child_elements(b).collect();
    children_a.len() == children_b.len()
        && children_a
            .iter()
            .zip(children_b.iter())
            .all(|(x, y)| structurally_equal(x, y))
}
