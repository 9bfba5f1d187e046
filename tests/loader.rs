use datatree::config::{EngineConfig, MAX_CALL_DEPTH_VAR, MAX_STEPS_VAR};
use datatree::error::{ConfigError, EngineError, ErrorKind, LoadError};
use datatree::loader::{from_json_file, from_json_file_with, from_json_file_with_overrides, from_json_str};
use datatree::value::Value;
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

const TREE: &str = r#"{
    "config": { "max_steps": 5000 },
    "entities": [
        { "name": "Input1", "type": "WIDGET", "properties": { "text": "Ada" } },
        {
            "name": "Text1",
            "type": "WIDGET",
            "properties": { "text": "Hello {{ Input1.text }}" },
            "config": {
                "bindingPaths": { "text": "TEMPLATE" },
                "reactivePaths": { "text": "TEMPLATE" },
                "dynamicBindingPathList": [ { "key": "text" } ]
            }
        },
        {
            "name": "Utils",
            "type": "JSACTION",
            "source": "export default { greet: (name) => 'Hi ' + name, count: 3 }"
        },
        {
            "name": "Text2",
            "type": "WIDGET",
            "properties": { "text": "{{ Utils.greet(Input1.text) }}" },
            "config": { "reactivePaths": { "text": "TEMPLATE" } }
        }
    ]
}"#;

fn write_temp(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn loads_and_evaluates_a_tree_file() {
    let file = write_temp(TREE);
    let mut evaluator = from_json_file(file.path()).unwrap();
    assert_eq!(evaluator.config().max_steps, 5000);
    assert_eq!(evaluator.config().max_call_depth, 64);

    let report = evaluator.process_pending().unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let snapshot = evaluator.snapshot();
    assert_eq!(snapshot.get("Text1.text"), Some(&Value::str("Hello Ada")));
    assert_eq!(snapshot.get("Text2.text"), Some(&Value::str("Hi Ada")));
    assert_eq!(snapshot.get("Utils.count"), Some(&Value::Number(3.0)));
    assert_eq!(evaluator.entity_config("Utils").unwrap().variables, vec!["count".to_string()]);
}

#[test]
fn explicit_config_replaces_the_documents() {
    let file = write_temp(TREE);
    let config = EngineConfig {
        max_call_depth: 8,
        ..EngineConfig::default()
    };
    let evaluator = from_json_file_with(file.path(), config.clone()).unwrap();
    assert_eq!(evaluator.config(), &config);
}

#[test]
fn source_errors_surface_as_markers() {
    let doc = r#"{ "entities": [
        { "name": "Broken", "type": "JSACTION", "source": "export default { a: " }
    ] }"#;
    let mut evaluator = from_json_str(doc).unwrap();
    evaluator.process_pending().unwrap();
    assert_eq!(
        evaluator.snapshot().error("Broken.body").map(|e| e.kind),
        Some(ErrorKind::ParseError)
    );
}

#[test]
fn bad_documents_are_rejected() {
    assert!(matches!(from_json_str("{ not json"), Err(LoadError::Json(_))));
    assert!(matches!(
        from_json_str(r#"{ "entities": [ { "name": "X", "type": "SPACESHIP" } ] }"#),
        Err(LoadError::Json(_))
    ));
    assert!(matches!(
        from_json_str(r#"{ "entities": [ { "name": "a b", "type": "WIDGET" } ] }"#),
        Err(LoadError::Engine(EngineError::InvalidName(_)))
    ));
    assert!(matches!(
        from_json_str(
            r#"{ "entities": [ { "name": "A", "type": "WIDGET" }, { "name": "A", "type": "WIDGET" } ] }"#
        ),
        Err(LoadError::Engine(EngineError::DuplicateEntity(name))) if name == "A"
    ));
    assert!(matches!(
        from_json_file("/definitely/not/here.json"),
        Err(LoadError::Io(_))
    ));
}

#[test]
fn config_defaults_fill_missing_fields() {
    let config = EngineConfig::from_json_str(r#"{ "log_passes": false }"#).unwrap();
    assert_eq!(
        config,
        EngineConfig {
            log_passes: false,
            ..EngineConfig::default()
        }
    );
    assert!(matches!(
        EngineConfig::from_json_str(r#"{ "max_steps": "many" }"#),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn config_file_and_overrides() {
    let file = write_temp(r#"{ "max_call_depth": 10 }"#);
    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_call_depth, 10);

    let config = config
        .with_overrides(|var| (var == MAX_STEPS_VAR).then(|| "250".to_string()))
        .unwrap();
    assert_eq!(config.max_call_depth, 10);
    assert_eq!(config.max_steps, 250);
    assert_eq!(config.limits().max_steps, 250);

    let err = EngineConfig::default()
        .with_overrides(|var| (var == MAX_CALL_DEPTH_VAR).then(|| "0".to_string()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Env { var, .. } if var == MAX_CALL_DEPTH_VAR));
}

#[test]
fn overrides_apply_on_top_of_the_documents_config() {
    let file = write_temp(TREE);
    let evaluator = from_json_file_with_overrides(file.path(), |var| {
        (var == MAX_CALL_DEPTH_VAR).then(|| "12".to_string())
    })
    .unwrap();
    assert_eq!(evaluator.config().max_steps, 5000);
    assert_eq!(evaluator.config().max_call_depth, 12);

    let unchanged = from_json_file_with_overrides(file.path(), |_| None).unwrap();
    assert_eq!(unchanged.config().max_call_depth, 64);

    let err = from_json_file_with_overrides(file.path(), |var| {
        (var == MAX_STEPS_VAR).then(|| "lots".to_string())
    })
    .unwrap_err();
    assert!(matches!(err, LoadError::Config(ConfigError::Env { var, .. }) if var == MAX_STEPS_VAR));
}
