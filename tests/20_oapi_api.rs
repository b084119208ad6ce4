mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

use common::{get, json_request, send, test_app};

fn error_entry(body: &str) -> Result<(String, String)> {
    let json: Value = serde_json::from_str(body)?;
    let entry = &json[0];
    Ok((
        entry["code"].as_str().unwrap_or_default().to_string(),
        entry["description"].as_str().unwrap_or_default().to_string(),
    ))
}

#[tokio::test]
async fn unknown_service_id() -> Result<()> {
    let (status, body) = send(test_app()?, get("/api/nope/features/collections")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "API not found error");
    assert_eq!(description, "Service with given id (nope) was not found");
    Ok(())
}

#[tokio::test]
async fn unknown_endpoint() -> Result<()> {
    let (status, body) = send(test_app()?, get("/api/qwc_demo/features/bogus")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "Bad request error");
    assert_eq!(description, "Endpoint /bogus for method GET does not exist");
    Ok(())
}

#[tokio::test]
async fn wrong_method_is_an_unknown_endpoint() -> Result<()> {
    let request = json_request(
        "DELETE",
        "/api/qwc_demo/features/collections/edit_points/items",
        "",
    );
    let (status, body) = send(test_app()?, request).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "Bad request error");
    assert_eq!(
        description,
        "Endpoint /collections/edit_points/items for method DELETE does not exist"
    );
    Ok(())
}

#[tokio::test]
async fn unknown_collection() -> Result<()> {
    let (status, body) = send(
        test_app()?,
        get("/api/qwc_demo/features/collections/secret_layer/items"),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "API not found error");
    assert_eq!(
        description,
        "Collection with given id (secret_layer) was not found, not permitted, \
         or multiple matches were found"
    );
    Ok(())
}

#[tokio::test]
async fn unreadable_collection_looks_unknown() -> Result<()> {
    // "ÖV: Haltestellen" exists but its grant is not readable
    let (status, body) = send(
        test_app()?,
        get("/api/qwc_demo/features/collections/%C3%96V-_Haltestellen/items/1"),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "API not found error");
    assert!(description.contains("(ÖV-_Haltestellen)"));
    Ok(())
}

#[tokio::test]
async fn anonymous_cannot_create_features() -> Result<()> {
    let request = json_request(
        "POST",
        "/api/qwc_demo/features/collections/edit_points/items",
        r#"{"type": "Feature", "properties": {"description": "x"}}"#,
    );
    let (status, body) = send(test_app()?, request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "Forbidden");
    assert_eq!(description, "Features cannot be added to layer 'edit_points'");
    Ok(())
}

#[tokio::test]
async fn anonymous_cannot_update_features() -> Result<()> {
    let request = json_request(
        "PATCH",
        "/api/qwc_demo/features/collections/edit_points/items/7",
        r#"{"modify": {"description": "x"}}"#,
    );
    let (status, body) = send(test_app()?, request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, description) = error_entry(&body)?;
    assert_eq!(description, "Features in layer 'edit_points' cannot be changed");
    Ok(())
}

#[tokio::test]
async fn anonymous_cannot_delete_features() -> Result<()> {
    let request = json_request(
        "DELETE",
        "/api/qwc_demo/features/collections/edit_points/items/7",
        "",
    );
    let (status, body) = send(test_app()?, request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, description) = error_entry(&body)?;
    assert_eq!(
        description,
        "Features in layer 'edit_points' cannot be deleted"
    );
    Ok(())
}

#[tokio::test]
async fn invalid_json_body_is_a_bad_request() -> Result<()> {
    let request = json_request(
        "POST",
        "/api/qwc_demo/features/collections/edit_points/items",
        "{not json",
    );
    let (status, body) = send(test_app()?, request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (code, description) = error_entry(&body)?;
    assert_eq!(code, "Bad request error");
    assert!(description.starts_with("invalid JSON body"));
    Ok(())
}
