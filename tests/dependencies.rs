use datatree::dependencies::{entity_dependencies, extract_references, path_dependencies, trim_to_tree};
use datatree::entity::{Entity, EntityConfig, EntityType, SubstitutionType};
use datatree::value::Value;
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn tree(entities: Vec<Entity>) -> BTreeMap<String, Entity> {
    entities.into_iter().map(|e| (e.name.clone(), e)).collect()
}

fn is_entity(name: &str) -> bool {
    matches!(name, "Input1" | "Table1" | "Api1")
}

#[test]
fn each_path_depends_only_on_its_own_expression() {
    let mut user = serde_json::Map::new();
    user.insert("name".into(), "Ada".into());
    user.insert("email".into(), "ada@example.com".into());
    let appsmith = Entity::create("appsmith", EntityType::Appsmith)
        .with_property("user", Value::from(serde_json::Value::Object(user)));
    let inputs = Entity::create("inputs", EntityType::ModuleInput)
        .with_property("username", "{{appsmith.user.name}}")
        .with_property("email", "{{appsmith.user.email}}");
    let config = EntityConfig::with_bindings(&[
        ("username", SubstitutionType::Template),
        ("email", SubstitutionType::Template),
    ]);
    let tree = tree(vec![appsmith, inputs.clone()]);

    let deps = entity_dependencies(&inputs, &config, &tree);

    assert_eq!(deps.len(), 2);
    assert_eq!(deps["inputs.username"].references, set(&["appsmith.user.name"]));
    assert_eq!(deps["inputs.email"].references, set(&["appsmith.user.email"]));
    assert!(deps.values().all(|d| d.unresolved.is_empty() && d.error.is_none()));
}

#[test]
fn locals_and_globals_are_not_references() {
    let found = extract_references(
        "Table1.data.map(row => row.id + Input1.text.length).filter(x => Math.abs(x) > limit)",
        is_entity,
        None,
    )
    .unwrap();
    assert_eq!(found.references, set(&["Input1.text.length", "Table1.data.map"]));
    assert_eq!(found.unresolved, set(&["limit"]));
}

#[test]
fn block_declarations_shadow_entities() {
    let found = extract_references(
        "(() => { const Input1 = 2; return Input1 + Table1.data[0]['name']; })()",
        is_entity,
        None,
    )
    .unwrap();
    assert_eq!(found.references, set(&["Table1.data[0].name"]));
}

#[test]
fn this_stands_for_the_js_object() {
    let found = extract_references("this.count + this.helper()", |_| false, Some("JSObject1")).unwrap();
    assert_eq!(found.references, set(&["JSObject1.count", "JSObject1.helper"]));
}

#[test]
fn dynamic_index_keeps_the_static_prefix() {
    let found = extract_references("Table1.data[Input1.index]", is_entity, None).unwrap();
    assert_eq!(found.references, set(&["Input1.index", "Table1.data"]));
}

#[test]
fn syntax_errors_are_reported() {
    assert!(extract_references("Input1.text +", is_entity, None).is_err());
}

#[test]
fn references_are_trimmed_to_existing_paths() {
    let tree = tree(vec![
        Entity::create("Api1", EntityType::Action).with_property("data", Value::object()),
        Entity::create("Input1", EntityType::Widget).with_property("text", "hi"),
    ]);
    assert_eq!(trim_to_tree("Api1.data.users[0].id", &tree), "Api1.data");
    assert_eq!(trim_to_tree("Input1.text.length", &tree), "Input1.text");
    assert_eq!(trim_to_tree("Input1.missing", &tree), "Input1");
    assert_eq!(trim_to_tree("Unknown.a.b", &tree), "Unknown.a.b");
}

#[test]
fn none_paths_only_carry_declared_dependencies() {
    let entity = Entity::create("JSObject1", EntityType::JsAction)
        .with_property("body", "export default { myFun1: () => Input1.text }");
    let mut config = EntityConfig::js_object();
    config
        .dependency_map
        .insert("body".to_string(), vec!["myFun1".to_string()]);
    let tree = tree(vec![entity.clone()]);

    let deps = path_dependencies(&entity, &config, "body", &tree);
    assert_eq!(deps.references, set(&["JSObject1.myFun1"]));
    assert!(deps.unresolved.is_empty());
}

#[test]
fn unparsable_bindings_keep_the_error() {
    let entity = Entity::create("Text1", EntityType::Widget).with_property("text", "{{ Input1. }}");
    let config = EntityConfig::with_bindings(&[("text", SubstitutionType::Template)]);
    let tree = tree(vec![entity.clone()]);

    let deps = path_dependencies(&entity, &config, "text", &tree);
    assert!(deps.error.is_some());
    assert!(deps.references.is_empty());
}
