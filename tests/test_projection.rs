//! Field authorization and projection.

use entity_store::{authorize, filter_fields, Entity, Projection};
use serde_json::{json, Value as JsonValue};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn doc(value: JsonValue) -> Entity {
    value.as_object().cloned().expect("document must be an object")
}

fn author() -> Entity {
    doc(json!({
        "id": 2,
        "name": "Walter",
        "address": { "city": "Albuquerque", "state": "NM", "country": "USA", "zip": "87104" },
        "bio": { "male": true, "body": { "height": 180, "weight": 80 } }
    }))
}

#[test]
fn empty_allow_list_means_no_restriction() {
    let requested = strings(&["id", "whatever.deep"]);
    assert_eq!(authorize(&requested, &[]), requested);
}

#[test]
fn parent_allows_child_but_not_sibling() {
    let allowed = strings(&["id", "name", "bio.body"]);
    let requested = strings(&["bio.male", "bio.body.height"]);

    let fields = authorize(&requested, &allowed);
    assert_eq!(fields, strings(&["bio.body.height"]));

    let projected = filter_fields(&author(), &fields);
    assert_eq!(JsonValue::Object(projected), json!({ "bio": { "body": { "height": 180 } } }));
}

#[test]
fn container_request_expands_to_allowed_children() {
    let allowed = strings(&["id", "address.city", "address.state", "address.country"]);
    let requested = strings(&["id", "address"]);

    let fields = authorize(&requested, &allowed);
    assert_eq!(fields, strings(&["id", "address.city", "address.state", "address.country"]));

    let projected = filter_fields(&author(), &fields);
    assert_eq!(
        JsonValue::Object(projected),
        json!({ "id": 2, "address": { "city": "Albuquerque", "state": "NM", "country": "USA" } })
    );
}

#[test]
fn unknown_fields_are_dropped_silently() {
    let allowed = strings(&["id", "name"]);
    let fields = authorize(&strings(&["id", "password", "name", "id"]), &allowed);
    assert_eq!(fields, strings(&["id", "name"]));
}

#[test]
fn missing_paths_are_skipped() {
    let projected = filter_fields(&author(), &strings(&["name", "nickname", "bio.body.shoe"]));
    assert_eq!(JsonValue::Object(projected), json!({ "name": "Walter" }));
}

#[test]
fn empty_field_list_is_identity() {
    assert_eq!(filter_fields(&author(), &[]), author());
}

#[test]
fn projection_is_idempotent() {
    let allowed = strings(&["id", "name", "bio.body"]);
    let fields = authorize(&strings(&["name", "bio.body.weight", "address"]), &allowed);

    let once = filter_fields(&author(), &fields);
    let twice = filter_fields(&once, &fields);
    assert_eq!(once, twice);
    assert_eq!(JsonValue::Object(once), json!({ "name": "Walter", "bio": { "body": { "weight": 80 } } }));
}

#[test]
fn projection_falls_back_to_configured_default() {
    let allowed = strings(&["id", "name"]);

    let projection = Projection::resolve(&[], &allowed, &allowed);
    assert_eq!(JsonValue::Object(projection.apply(&author())), json!({ "id": 2, "name": "Walter" }));

    assert_eq!(Projection::resolve(&[], &[], &[]), Projection::Identity);
}

#[test]
fn fully_rejected_request_projects_to_empty_document() {
    let allowed = strings(&["id", "name"]);
    let projection = Projection::resolve(&strings(&["bio"]), &allowed, &allowed);

    assert_eq!(projection, Projection::Fields(Vec::new()));
    assert!(projection.apply(&author()).is_empty());
}
