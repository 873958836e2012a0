use std::io::Write;

use super::*;

const MENU: &str = r#"
[[items]]
label = "Home"
path = "/"

[[items]]
label = "Customers"
title = "Customer records"

[[items.items]]
label = "Search"
path = "/customers/search"

[[items.items]]
label = "Edit"
path = "/customers/edit"
"#;

#[test]
fn parse_reads_nested_items() {
    let menu = Menu::parse(MENU).expect("parse menu");

    assert_eq!(menu.children.len(), 2);
    assert_eq!(menu.children[1].title.as_deref(), Some("Customer records"));
    assert_eq!(menu.children[1].children[1].path.as_deref(), Some("/customers/edit"));
    assert!(!menu.children[1].selected);
}

#[test]
fn select_marks_item_and_ancestors_on_a_copy() {
    let catalog = MenuCatalog::from_menu(Menu::parse(MENU).expect("parse menu"));

    let menu = catalog.for_request("/customers/edit").expect("menu");
    let customers = menu.selected_child().expect("selected section");
    assert_eq!(customers.label, "Customers");
    assert_eq!(customers.selected_child().map(|item| item.label.as_str()), Some("Edit"));
    assert!(!menu.children[0].selected);

    let shared = catalog.root().expect("root");
    assert!(shared.children.iter().all(|item| !item.selected));
    assert_eq!(catalog.load_count(), 0);
}

#[test]
fn unknown_path_selects_nothing() {
    let menu = Menu::parse(MENU).expect("parse menu").select("/elsewhere");
    assert!(menu.selected_child().is_none());
    assert_eq!(menu.to_value()["items"][0]["selected"], serde_json::json!(false));
}

#[test]
fn file_catalog_loads_once() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(MENU.as_bytes()).expect("write menu");

    let catalog = MenuCatalog::from_file(file.path());
    let first = catalog.root().expect("first load");
    let second = catalog.root().expect("second load");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(catalog.load_count(), 1);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let catalog = MenuCatalog::from_file(dir.path().join("menu.toml"));

    let err = catalog.root().expect_err("missing file");
    assert!(err.to_string().contains("failed to read menu file"));
}

#[test]
fn malformed_definition_is_rejected() {
    assert!(Menu::parse("items = 3").is_err());
}
