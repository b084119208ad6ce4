//! WFS Transaction body filtering.
//!
//! Transaction bodies are rewritten before forwarding: inserts, updates and
//! deletes on non-permitted layers are silently dropped, while operations on
//! permitted layers without the matching write capability reject the whole
//! request.

use xmltree::{Element, XMLNode};

use crate::error::OwsException;
use crate::ogc::names::{clean_attribute_name, clean_layer_name};
use crate::ogc::xml::{self};
use crate::permissions::{WfsLayerPermission, WfsPermissionSet};

/// Filter a transaction body, returning the rewritten XML.
pub fn filter_transaction(
    body: &str,
    permissions: &WfsPermissionSet,
) -> Result<String, OwsException> {
    let mut root = xml::parse(body).map_err(|_| {
        OwsException::new("RequestNotWellFormed", "Transaction body is not well-formed XML")
    })?;

    filter_inserts(&mut root, permissions)?;
    filter_updates(&mut root, permissions)?;
    filter_deletes(&mut root, permissions)?;

    xml::serialize(&root).map_err(|_| {
        OwsException::new("RequestNotWellFormed", "Transaction body could not be serialized")
    })
}

fn filter_inserts(
    root: &mut Element,
    permissions: &WfsPermissionSet,
) -> Result<(), OwsException> {
    for insert in xml::child_elements_mut(root).filter(|el| el.name == "Insert") {
        let mut kept = Vec::new();
        for node in std::mem::take(&mut insert.children) {
            match node {
                XMLNode::Element(mut feature) => {
                    let typename = clean_layer_name(&feature.name);
                    let Some(permission) = permissions.layer(&typename) else {
                        // layer not permitted, drop the element
                        continue;
                    };
                    if !permission.creatable {
                        return Err(no_permission("create", &typename));
                    }
                    filter_feature_attributes(&mut feature, permission);
                    kept.push(XMLNode::Element(feature));
                }
                other => kept.push(other),
            }
        }
        insert.children = kept;
    }
    Ok(())
}

fn filter_updates(
    root: &mut Element,
    permissions: &WfsPermissionSet,
) -> Result<(), OwsException> {
    let mut error = None;
    let mut kept = Vec::new();
    for node in std::mem::take(&mut root.children) {
        let mut update = match node {
            XMLNode::Element(el) if el.name == "Update" && error.is_none() => el,
            other => {
                kept.push(other);
                continue;
            }
        };
        let typename = clean_layer_name(
            update
                .attributes
                .get("typeName")
                .map(String::as_str)
                .unwrap_or(""),
        );
        let Some(permission) = permissions.layer(&typename) else {
            continue;
        };
        if !permission.updatable {
            error = Some(no_permission("update", &typename));
            kept.push(XMLNode::Element(update));
            continue;
        }
        let permitted = permission.cleaned_attributes();
        xml::retain_child_elements(&mut update, |property| {
            if property.name != "Property" {
                return true;
            }
            let name = xml::child_text(property, "Name").unwrap_or_default();
            let cleaned = clean_attribute_name(&name);
            cleaned == "geometry" || permitted.contains(&cleaned)
        });
        kept.push(XMLNode::Element(update));
    }
    root.children = kept;
    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn filter_deletes(
    root: &mut Element,
    permissions: &WfsPermissionSet,
) -> Result<(), OwsException> {
    let mut error = None;
    let mut kept = Vec::new();
    for node in std::mem::take(&mut root.children) {
        let delete = match node {
            XMLNode::Element(el) if el.name == "Delete" && error.is_none() => el,
            other => {
                kept.push(other);
                continue;
            }
        };
        let typename = clean_layer_name(
            delete
                .attributes
                .get("typeName")
                .map(String::as_str)
                .unwrap_or(""),
        );
        let Some(permission) = permissions.layer(&typename) else {
            continue;
        };
        if !permission.deletable {
            error = Some(no_permission("delete", &typename));
        }
        kept.push(XMLNode::Element(delete));
    }
    root.children = kept;
    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Strip non-permitted attribute elements from an insert feature, always
/// keeping the geometry.
fn filter_feature_attributes(feature: &mut Element, permission: &WfsLayerPermission) {
    let permitted = permission.cleaned_attributes();
    xml::retain_child_elements(feature, |attr| {
        let cleaned = clean_attribute_name(&attr.name);
        cleaned == "geometry" || permitted.contains(&cleaned)
    });
}

fn no_permission(operation: &str, typename: &str) -> OwsException {
    OwsException::new(
        "Forbidden",
        format!("No {} permissions on typename '{}'", operation, typename),
    )
}
