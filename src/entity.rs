use crate::path;
use crate::value::{Object, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "WIDGET")]
    Widget,
    #[serde(rename = "ACTION")]
    Action,
    #[serde(rename = "JSACTION")]
    JsAction,
    #[serde(rename = "APPSMITH")]
    Appsmith,
    #[serde(rename = "MODULE_INPUT")]
    ModuleInput,
}

/// How the raw value of a path is turned into its evaluated value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubstitutionType {
    Template,
    SmartSubstitute,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicBindingPath {
    pub key: String,
}

impl DynamicBindingPath {
    pub fn new(key: impl Into<String>) -> Self {
        DynamicBindingPath { key: key.into() }
    }
}

/// Per-function metadata of a JS object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMeta {
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub confirm_before_execute: bool,
}

impl FunctionMeta {
    pub fn with_arguments(arguments: Vec<String>) -> Self {
        FunctionMeta {
            arguments,
            is_async: false,
            confirm_before_execute: false,
        }
    }
}

/// A named node of the data tree holding raw, unevaluated property values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub properties: Object,
}

impl Entity {
    pub fn create(name: impl Into<String>, entity_type: EntityType) -> Self {
        Entity {
            name: name.into(),
            entity_type,
            properties: Object::new(),
        }
    }

    pub fn with_property(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path::get(&self.properties, path)
    }

    /// Returns `false` when the path indexes past [`path::MAX_ARRAY_LENGTH`].
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        path::set(&mut self.properties, path, value)
    }

    pub fn unset(&mut self, path: &str) -> Option<Value> {
        path::unset(&mut self.properties, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        path::has(&self.properties, path)
    }

    pub fn is_js_object(&self) -> bool {
        self.entity_type == EntityType::JsAction
    }
}

/// Static and derived metadata kept alongside an entity.
///
/// Treated as an owned value: reconciliation builds a new config and bumps
/// `version` only when something changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityConfig {
    pub binding_paths: BTreeMap<String, SubstitutionType>,
    pub reactive_paths: BTreeMap<String, SubstitutionType>,
    pub dynamic_binding_path_list: Vec<DynamicBindingPath>,
    pub dependency_map: BTreeMap<String, Vec<String>>,
    pub meta: BTreeMap<String, FunctionMeta>,
    pub variables: Vec<String>,
    pub version: u64,
}

impl EntityConfig {
    /// Config whose binding paths are all reactive and dynamic, in the given order.
    pub fn with_bindings(paths: &[(&str, SubstitutionType)]) -> Self {
        let mut config = EntityConfig::default();
        for (path, kind) in paths {
            config.binding_paths.insert(path.to_string(), *kind);
            config.reactive_paths.insert(path.to_string(), *kind);
            config
                .dynamic_binding_path_list
                .push(DynamicBindingPath::new(*path));
        }
        config
    }

    /// Empty JS object config: `body` is tracked verbatim and depends on the functions.
    pub fn js_object() -> Self {
        let mut config = EntityConfig::default();
        config
            .reactive_paths
            .insert("body".to_string(), SubstitutionType::None);
        config
            .dependency_map
            .insert("body".to_string(), Vec::new());
        config
    }

    pub fn is_dynamic(&self, key: &str) -> bool {
        self.dynamic_binding_path_list.iter().any(|p| p.key == key)
    }

    pub fn functions(&self) -> impl Iterator<Item = &String> {
        self.meta.keys()
    }

    pub fn body_dependencies(&self) -> &[String] {
        self.dependency_map
            .get("body")
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
