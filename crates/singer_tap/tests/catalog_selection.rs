use std::path::PathBuf;

use singer_tap::{apply_overrides, Catalog, CatalogSelector, SelectionOverride};

fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_catalog() -> Catalog {
    let text = std::fs::read_to_string(fixtures_root().join("catalog.json")).expect("read catalog");
    Catalog::from_json(&text).unwrap()
}

fn load_overrides() -> Vec<SelectionOverride> {
    let text =
        std::fs::read_to_string(fixtures_root().join("overrides.json")).expect("read overrides");
    serde_json::from_str(&text).unwrap()
}

#[test]
fn later_overrides_win_over_earlier_ones() {
    let selected = apply_overrides(load_catalog(), &load_overrides()).unwrap();
    let x = selected.stream("x").unwrap();

    assert_eq!(x.root_metadata().unwrap().metadata.selected, Some(true));
    assert_eq!(
        x.property_metadata("name").unwrap().metadata.selected,
        Some(true)
    );
    assert_eq!(
        x.property_metadata("id").unwrap().metadata.selected,
        Some(true)
    );
}

#[test]
fn first_match_alone_would_deselect_the_property() {
    let overrides = load_overrides();
    let selected = apply_overrides(load_catalog(), &overrides[..2]).unwrap();
    let x = selected.stream("x").unwrap();

    assert!(x.is_selected());
    assert_eq!(
        x.property_metadata("name").unwrap().metadata.selected,
        Some(false)
    );
    assert_eq!(
        x.property_metadata("id").unwrap().metadata.selected,
        Some(true)
    );
}

#[test]
fn replication_settings_land_on_root_metadata() {
    let selected = apply_overrides(load_catalog(), &load_overrides()).unwrap();
    let y = selected.stream("y").unwrap();
    let root = &y.root_metadata().unwrap().metadata;
    assert_eq!(root.replication_method.as_deref(), Some("INCREMENTAL"));
    assert_eq!(root.replication_key.as_deref(), Some("updated_at"));

    let property = &y.property_metadata("updated_at").unwrap().metadata;
    assert_eq!(property.replication_method, None);

    // Every rule for `x` matches its root without naming a replication method.
    let x_root = &selected.stream("x").unwrap().root_metadata().unwrap().metadata;
    assert_eq!(x_root.replication_method, None);
    assert_eq!(x_root.replication_key, None);
    assert_eq!(x_root.extra["table-key-properties"], serde_json::json!(["id"]));
}

#[test]
fn output_keeps_the_catalog_shape() {
    let catalog = load_catalog();
    let selected = CatalogSelector::new(load_overrides())
        .unwrap()
        .apply(catalog.clone());

    assert_eq!(selected.streams.len(), catalog.streams.len());
    let x = selected.stream("x").unwrap();
    assert_eq!(x.tap_stream_id.as_deref(), Some("public-x"));
    assert_eq!(x.schema, catalog.stream("x").unwrap().schema);
    assert_eq!(
        x.root_metadata().unwrap().metadata.extra["table-key-properties"],
        serde_json::json!(["id"])
    );
    assert_eq!(selected.selected_streams(), vec!["x", "y"]);

    let json: serde_json::Value =
        serde_json::from_str(&selected.to_json_pretty().unwrap()).unwrap();
    assert_eq!(
        json["streams"][1]["metadata"][0]["metadata"]["replication-key"],
        "updated_at"
    );
}

#[test]
fn empty_override_list_is_identity() {
    let catalog = load_catalog();
    let selector = CatalogSelector::new(Vec::new()).unwrap();
    assert!(selector.is_empty());
    assert_eq!(selector.apply(catalog.clone()), catalog);
}
