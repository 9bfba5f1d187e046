use datatree::entity::{Entity, EntityConfig, EntityType, FunctionMeta, SubstitutionType};
use datatree::error::EngineError;
use datatree::jsobject::{ParsedJsBody, parse_js_object};
use datatree::patcher::{reconcile_js_collection, remove_functions_and_variables, validate};
use datatree::value::Value;
use pretty_assertions::assert_eq;

fn js_object() -> (Entity, EntityConfig) {
    (
        Entity::create("JSObject1", EntityType::JsAction),
        EntityConfig::js_object(),
    )
}

fn reconcile(entity: &Entity, config: &EntityConfig, body: &ParsedJsBody) -> (Entity, EntityConfig) {
    let result = reconcile_js_collection(entity, config, body).unwrap();
    (result.entity, result.config)
}

/// Every tracked path has a tree value and every tree value is tracked.
fn assert_no_orphans(entity: &Entity, config: &EntityConfig) {
    for path in config.reactive_paths.keys().filter(|p| p.as_str() != "body") {
        assert!(entity.contains(path), "{} tracked but missing from the tree", path);
    }
    for binding in &config.dynamic_binding_path_list {
        assert!(config.reactive_paths.contains_key(&binding.key));
        assert!(entity.contains(&binding.key));
    }
    for key in entity.properties.keys().filter(|k| k.as_str() != "body") {
        assert!(config.reactive_paths.contains_key(key), "{} in the tree but untracked", key);
        assert!(config.is_dynamic(key));
    }
}

#[test]
fn parses_functions_and_variables_in_source_order() {
    let source = r#"export default {
        myVar1: [],
        myVar2: { a: 1 },
        myFun1: () => { return this.myVar1; },
        async myFun2(a, b) { return a + b; },
        myFun3: function (x) { return x; },
    }"#;
    let body = parse_js_object(source).unwrap();

    let names: Vec<&str> = body.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["myFun1", "myFun2", "myFun3"]);
    assert_eq!(body.actions[0].body, "() => { return this.myVar1; }");
    assert_eq!(body.actions[1].body, "async function (a, b) { return a + b; }");
    assert_eq!(body.actions[1].arguments, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(body.actions[2].arguments, vec!["x".to_string()]);

    assert_eq!(body.variables.len(), 2);
    assert_eq!(body.variables[0].value, "[]");
    assert_eq!(body.variables[1].value, "{ a: 1 }");
}

#[test]
fn blank_source_is_an_empty_body() {
    assert!(parse_js_object("   ").unwrap().is_empty());
    assert!(parse_js_object("export default {}").unwrap().is_empty());
}

#[test]
fn malformed_sources_are_rejected() {
    assert!(parse_js_object("{ a: 1 }").is_err());
    assert!(parse_js_object("export default { a: 1").is_err());
    assert!(parse_js_object("export default { a: 1, a: 2 }").is_err());
    assert!(parse_js_object("export default { a: 1 } extra").is_err());
}

#[test]
fn replacing_a_function_removes_the_old_one_everywhere() {
    let (entity, config) = js_object();
    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().action("foo", "() => 1", &[]));
    assert!(config.meta.contains_key("foo"));

    let result =
        reconcile_js_collection(&entity, &config, &ParsedJsBody::default().action("bar", "() => 2", &[])).unwrap();
    let (entity, config) = (result.entity, result.config);

    assert!(!config.reactive_paths.contains_key("foo"));
    assert!(!config.reactive_paths.contains_key("foo.data"));
    assert!(!config.is_dynamic("foo"));
    assert!(!config.meta.contains_key("foo"));
    assert!(!entity.contains("foo"));

    assert_eq!(config.reactive_paths.get("bar"), Some(&SubstitutionType::SmartSubstitute));
    assert!(config.is_dynamic("bar"));
    assert_eq!(config.meta.get("bar"), Some(&FunctionMeta::with_arguments(Vec::new())));
    assert!(!config.meta["bar"].is_async && !config.meta["bar"].confirm_before_execute);
    assert_eq!(entity.get("bar.body"), Some(&Value::str("() => 2")));
    assert_eq!(config.body_dependencies(), ["bar".to_string()]);

    assert_eq!(
        result.removed,
        vec!["JSObject1.foo".to_string(), "JSObject1.foo.data".to_string()]
    );
    assert_eq!(
        result.changed,
        vec!["JSObject1.bar".to_string(), "JSObject1.bar.data".to_string()]
    );
    assert_no_orphans(&entity, &config);
}

#[test]
fn reconciling_twice_is_a_no_op() {
    let (entity, config) = js_object();
    let body = ParsedJsBody::default()
        .action("fetch", "async () => Api1.run()", &[])
        .variable("page", "1");
    let (entity, config) = reconcile(&entity, &config, &body);

    let again = reconcile_js_collection(&entity, &config, &body).unwrap();
    assert!(again.is_noop());
    assert_eq!(again.entity, entity);
    assert_eq!(again.config, config);
    assert_eq!(again.config.version, 1);
}

#[test]
fn changed_body_keeps_cached_data() {
    let (entity, config) = js_object();
    let (mut entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().action("f", "() => 1", &[]));
    entity.set("f.data", Value::Number(1.0));

    let result =
        reconcile_js_collection(&entity, &config, &ParsedJsBody::default().action("f", "() => 2", &[])).unwrap();
    assert_eq!(result.changed, vec!["JSObject1.f".to_string()]);
    assert_eq!(result.entity.get("f.body"), Some(&Value::str("() => 2")));
    assert_eq!(result.entity.get("f.data"), Some(&Value::Number(1.0)));
    // Config is untouched, so the version stays.
    assert_eq!(result.config.version, config.version);
}

#[test]
fn empty_variable_to_value_and_back() {
    let (entity, config) = js_object();
    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().variable("v", ""));
    assert_eq!(entity.get("v"), Some(&Value::str("")));

    let filled = reconcile_js_collection(&entity, &config, &ParsedJsBody::default().variable("v", "42")).unwrap();
    assert_eq!(filled.changed, vec!["JSObject1.v".to_string()]);
    assert_eq!(filled.entity.get("v"), Some(&Value::str("42")));

    let emptied =
        reconcile_js_collection(&filled.entity, &filled.config, &ParsedJsBody::default().variable("v", "")).unwrap();
    assert_eq!(emptied.changed, vec!["JSObject1.v".to_string()]);
    assert_eq!(emptied.entity.get("v"), Some(&Value::str("")));
    assert_no_orphans(&emptied.entity, &emptied.config);
}

#[test]
fn non_text_variable_values_count_as_changed() {
    let (entity, config) = js_object();
    let (mut entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().variable("v", "1"));
    entity.set("v", Value::Number(1.0));

    let result = reconcile_js_collection(&entity, &config, &ParsedJsBody::default().variable("v", "1")).unwrap();
    assert_eq!(result.changed, vec!["JSObject1.v".to_string()]);
}

#[test]
fn name_moving_from_variable_to_function() {
    let (entity, config) = js_object();
    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().variable("x", "1"));
    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().action("x", "() => 1", &[]));

    assert!(config.variables.is_empty());
    assert!(config.meta.contains_key("x"));
    assert_eq!(entity.get("x.body"), Some(&Value::str("() => 1")));
    assert_no_orphans(&entity, &config);
}

#[test]
fn empty_body_removes_everything() {
    let (entity, config) = js_object();
    let body = ParsedJsBody::default().action("a", "() => 1", &[]).variable("b", "2");
    let (entity, config) = reconcile(&entity, &config, &body);

    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default());
    assert!(entity.properties.is_empty());
    assert!(config.meta.is_empty() && config.variables.is_empty());
    assert_eq!(config.reactive_paths.keys().collect::<Vec<_>>(), vec!["body"]);

    let again = remove_functions_and_variables(&entity, &config).unwrap();
    assert!(again.is_noop());
}

#[test]
fn reserved_names_are_rejected() {
    let (entity, config) = js_object();
    let err = reconcile_js_collection(&entity, &config, &ParsedJsBody::default().variable("body", "1")).unwrap_err();
    assert!(matches!(err, EngineError::InvalidName(name) if name == "JSObject1.body"));
}

#[test]
fn names_declared_twice_are_rejected() {
    let (entity, config) = js_object();
    let bodies = [
        ParsedJsBody::default().action("x", "() => 1", &[]).variable("x", "2"),
        ParsedJsBody::default().action("x", "() => 1", &[]).action("x", "() => 2", &[]),
        ParsedJsBody::default().variable("x", "1").variable("x", "2"),
    ];
    for body in &bodies {
        let err = reconcile_js_collection(&entity, &config, body).unwrap_err();
        assert!(matches!(&err, EngineError::DuplicateMember(name) if name == "JSObject1.x"), "{:?}", err);
    }

    // A rejected body leaves the object reconcilable.
    let (entity, config) = reconcile(&entity, &config, &ParsedJsBody::default().action("x", "() => 1", &[]));
    assert!(validate(&entity, &config).is_ok());
    assert_no_orphans(&entity, &config);
}

#[test]
fn inconsistent_config_is_a_structural_error() {
    let (entity, mut config) = js_object();
    config
        .meta
        .insert("ghost".to_string(), FunctionMeta::with_arguments(Vec::new()));

    assert!(matches!(
        validate(&entity, &config),
        Err(EngineError::StructuralInconsistency { .. })
    ));
    let err = reconcile_js_collection(&entity, &config, &ParsedJsBody::default().action("f", "() => 1", &[])).unwrap_err();
    assert!(matches!(err, EngineError::StructuralInconsistency { entity, .. } if entity == "JSObject1"));
}

#[test]
fn only_js_objects_are_reconciled() {
    let entity = Entity::create("Input1", EntityType::Widget);
    let err = reconcile_js_collection(&entity, &EntityConfig::default(), &ParsedJsBody::default()).unwrap_err();
    assert!(matches!(err, EngineError::NotJsObject(_)));
}
