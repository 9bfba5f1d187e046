use crate::config::EngineConfig;
use crate::engine::DataTreeEvaluator;
use crate::entity::{Entity, EntityConfig, EntityType};
use crate::error::{ConfigError, LoadError};
use crate::value::Object;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TreeDocument {
    #[serde(default)]
    config: Option<EngineConfig>,
    entities: Vec<EntityDocument>,
}

#[derive(Debug, Deserialize)]
struct EntityDocument {
    name: String,
    #[serde(rename = "type")]
    entity_type: EntityType,
    #[serde(default)]
    properties: Object,
    #[serde(default)]
    config: EntityConfig,
    /// JS object source, parsed into functions and variables on load.
    #[serde(default)]
    source: Option<String>,
}

/// Load a data tree from a JSON document
///
/// The document lists the entities of the tree together with their
/// configs. Every entity is registered and JS object sources are queued,
/// but no pass runs yet: call `process_pending` to evaluate.
///
/// # Arguments
/// * `text` - The JSON document
///
/// # Returns
/// * `Result<DataTreeEvaluator, LoadError>` - An evaluator with the tree queued, or an error
///
/// # Examples
/// ```
/// use datatree::loader::from_json_str;
///
/// let doc = r#"{ "entities": [
///     { "name": "Input1", "type": "WIDGET", "properties": { "text": "hi" } }
/// ] }"#;
/// let mut evaluator = from_json_str(doc).unwrap();
/// evaluator.process_pending().unwrap();
/// assert_eq!(evaluator.snapshot().get("Input1.text").unwrap().as_str(), Some("hi"));
/// ```
pub fn from_json_str(text: &str) -> Result<DataTreeEvaluator, LoadError> {
    load(text, |config| Ok(config.unwrap_or_default()))
}

/// Parses the document and builds the evaluator with the config `resolve`
/// derives from the document's own.
fn load<F>(text: &str, resolve: F) -> Result<DataTreeEvaluator, LoadError>
where
    F: FnOnce(Option<EngineConfig>) -> Result<EngineConfig, ConfigError>,
{
    let document: TreeDocument = serde_json::from_str(text)?;
    let config = resolve(document.config)?;
    let mut evaluator = DataTreeEvaluator::new(config);

    for doc in document.entities {
        let entity = Entity {
            name: doc.name,
            entity_type: doc.entity_type,
            properties: doc.properties,
        };
        let name = entity.name.clone();
        evaluator.register_entity(entity, doc.config)?;
        if let Some(source) = doc.source {
            evaluator.apply_js_object_source(&name, &source);
        }
    }
    Ok(evaluator)
}

/// Load a data tree from a JSON file
///
/// # Examples
/// ```no_run
/// use datatree::loader::from_json_file;
///
/// match from_json_file("tree.json") {
///     Ok(evaluator) => println!("Loaded {} queued edits", evaluator.pending()),
///     Err(e) => eprintln!("Error loading tree: {}", e),
/// }
/// ```
pub fn from_json_file(filepath: impl AsRef<Path>) -> Result<DataTreeEvaluator, LoadError> {
    let text = fs::read_to_string(filepath)?;
    from_json_str(&text)
}

/// Same as [`from_json_file`], with `config` replacing the document's own.
pub fn from_json_file_with(filepath: impl AsRef<Path>, config: EngineConfig) -> Result<DataTreeEvaluator, LoadError> {
    let text = fs::read_to_string(filepath)?;
    load(&text, |_| Ok(config))
}

/// Same as [`from_json_file`], with overrides such as
/// [`EngineConfig::with_env_overrides`] applied on top of the document's config.
pub fn from_json_file_with_overrides<F>(filepath: impl AsRef<Path>, lookup: F) -> Result<DataTreeEvaluator, LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = fs::read_to_string(filepath)?;
    load(&text, |config| config.unwrap_or_default().with_overrides(lookup))
}
