//! Reconciliation of a JS object entity with its latest parsed body.
//!
//! The patcher is pure: it takes the current entity and config and returns
//! new ones together with the paths that changed, leaving the inputs alone.
//! Each function is stored in the tree as `{ body, data }`, where `data`
//! caches the result of its last run; variables are stored as their
//! initialiser text.

use crate::entity::{DynamicBindingPath, Entity, EntityConfig, FunctionMeta, SubstitutionType};
use crate::error::EngineError;
use crate::jsobject::{ParsedJsBody, ParsedJsSubAction, ParsedVariable};
use crate::path::qualify;
use crate::value::{Object, Value};
use log::debug;
use std::collections::BTreeSet;

/// Names that collide with the JS object's own bookkeeping.
const RESERVED: &[&str] = &["body", "variables"];

/// Outcome of one reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub entity: Entity,
    pub config: EntityConfig,
    /// Qualified paths whose raw value was written.
    pub changed: Vec<String>,
    /// Qualified paths deleted from the tree.
    pub removed: Vec<String>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Tree value of a function: its source and its cached result.
pub fn function_entry(body: &str, data: Value) -> Value {
    let mut entry = Object::new();
    entry.insert("body".to_string(), Value::str(body));
    entry.insert("data".to_string(), data);
    Value::Object(entry)
}

pub fn data_path(function: &str) -> String {
    format!("{}.data", function)
}

/// Brings `entity` and `config` in line with `parsed`.
///
/// An empty body removes every function and variable.
pub fn reconcile_js_collection(
    entity: &Entity,
    config: &EntityConfig,
    parsed: &ParsedJsBody,
) -> Result<Reconciliation, EngineError> {
    if !entity.is_js_object() {
        return Err(EngineError::NotJsObject(entity.name.clone()));
    }
    validate(entity, config)?;
    if parsed.is_empty() {
        return remove_functions_and_variables(entity, config);
    }
    let mut declared = BTreeSet::new();
    for name in parsed
        .actions
        .iter()
        .map(|a| &a.name)
        .chain(parsed.variables.iter().map(|v| &v.name))
    {
        if RESERVED.contains(&name.as_str()) || name.is_empty() {
            return Err(EngineError::InvalidName(qualify(&entity.name, name)));
        }
        if !declared.insert(name.as_str()) {
            return Err(EngineError::DuplicateMember(qualify(&entity.name, name)));
        }
    }

    let mut patch = Patch::new(entity, config);

    // Removals go first so that a name moving between function and
    // variable is dropped before it is registered again.
    let parsed_actions: BTreeSet<&str> = parsed.actions.iter().map(|a| a.name.as_str()).collect();
    let stale_functions: Vec<String> = config
        .functions()
        .filter(|name| !parsed_actions.contains(name.as_str()))
        .cloned()
        .collect();
    for name in &stale_functions {
        patch.remove_function(name);
    }

    let parsed_variables: BTreeSet<&str> = parsed.variables.iter().map(|v| v.name.as_str()).collect();
    let stale_variables: Vec<String> = config
        .variables
        .iter()
        .filter(|name| !parsed_variables.contains(name.as_str()))
        .cloned()
        .collect();
    for name in &stale_variables {
        patch.remove_variable(name);
    }

    for action in &parsed.actions {
        if patch.config.meta.contains_key(&action.name) {
            patch.update_function(action);
        } else {
            patch.add_function(action);
        }
    }

    for variable in &parsed.variables {
        if patch.config.variables.contains(&variable.name) {
            patch.update_variable(variable);
        } else {
            patch.add_variable(variable);
        }
    }

    Ok(patch.finish(config))
}

/// Removes every function and variable of a JS object.
pub fn remove_functions_and_variables(
    entity: &Entity,
    config: &EntityConfig,
) -> Result<Reconciliation, EngineError> {
    validate(entity, config)?;
    let mut patch = Patch::new(entity, config);
    let functions: Vec<String> = config.functions().cloned().collect();
    for name in &functions {
        patch.remove_function(name);
    }
    for name in &config.variables {
        patch.remove_variable(name);
    }
    Ok(patch.finish(config))
}

/// Checks that every tracking entry of a JS object has its tree value.
pub fn validate(entity: &Entity, config: &EntityConfig) -> Result<(), EngineError> {
    let fail = |detail: String| {
        Err(EngineError::StructuralInconsistency {
            entity: entity.name.clone(),
            detail,
        })
    };

    for name in config.functions() {
        if !config.reactive_paths.contains_key(name) || !config.reactive_paths.contains_key(&data_path(name)) {
            return fail(format!("function {} has no reactive path", name));
        }
        if !config.is_dynamic(name) {
            return fail(format!("function {} is not a dynamic binding", name));
        }
        if !config.body_dependencies().contains(name) {
            return fail(format!("function {} is missing from body dependencies", name));
        }
    }
    for name in &config.variables {
        if !config.reactive_paths.contains_key(name) || !config.is_dynamic(name) {
            return fail(format!("variable {} is not tracked", name));
        }
    }
    for path in config.reactive_paths.keys().filter(|p| p.as_str() != "body") {
        let root = path.split('.').next().unwrap_or(path);
        if !config.meta.contains_key(root) && !config.variables.iter().any(|v| v == root) {
            return fail(format!("reactive path {} belongs to no function or variable", path));
        }
        if !entity.contains(path) {
            return fail(format!("reactive path {} has no value in the tree", path));
        }
    }
    for binding in &config.dynamic_binding_path_list {
        if !config.reactive_paths.contains_key(&binding.key) {
            return fail(format!("dynamic binding {} is not a reactive path", binding.key));
        }
    }
    for dependency in config.body_dependencies() {
        if !config.meta.contains_key(dependency) {
            return fail(format!("body depends on unknown function {}", dependency));
        }
    }
    Ok(())
}

struct Patch {
    entity: Entity,
    config: EntityConfig,
    changed: Vec<String>,
    removed: Vec<String>,
}

impl Patch {
    fn new(entity: &Entity, config: &EntityConfig) -> Self {
        Patch {
            entity: entity.clone(),
            config: config.clone(),
            changed: Vec::new(),
            removed: Vec::new(),
        }
    }

    fn qualified(&self, path: &str) -> String {
        qualify(&self.entity.name, path)
    }

    fn add_function(&mut self, action: &ParsedJsSubAction) {
        let name = &action.name;
        self.config
            .reactive_paths
            .insert(name.clone(), SubstitutionType::SmartSubstitute);
        self.config
            .reactive_paths
            .insert(data_path(name), SubstitutionType::Template);
        self.config
            .dynamic_binding_path_list
            .push(DynamicBindingPath::new(name.clone()));
        self.config
            .dependency_map
            .entry("body".to_string())
            .or_default()
            .push(name.clone());
        self.config
            .meta
            .insert(name.clone(), FunctionMeta::with_arguments(action.arguments.clone()));
        self.entity
            .set(name, function_entry(&action.body, Value::object()));
        self.changed.push(self.qualified(name));
        self.changed.push(self.qualified(&data_path(name)));
    }

    /// Overwrites the stored body, keeping the cached `data`.
    fn update_function(&mut self, action: &ParsedJsSubAction) {
        let name = &action.name;
        let body_path = format!("{}.body", name);
        if self.entity.get(&body_path).and_then(Value::as_str) != Some(action.body.as_str()) {
            self.entity.set(&body_path, Value::str(&action.body));
            self.changed.push(self.qualified(name));
        }
        if let Some(meta) = self.config.meta.get_mut(name) {
            if meta.arguments != action.arguments {
                meta.arguments = action.arguments.clone();
            }
        }
    }

    fn remove_function(&mut self, name: &str) {
        let data = data_path(name);
        self.config.reactive_paths.remove(name);
        self.config.reactive_paths.remove(&data);
        self.config
            .dynamic_binding_path_list
            .retain(|binding| binding.key != name);
        if let Some(body) = self.config.dependency_map.get_mut("body") {
            body.retain(|dependency| dependency != name);
        }
        self.config.meta.remove(name);
        self.entity.unset(name);
        self.removed.push(self.qualified(name));
        self.removed.push(self.qualified(&data));
    }

    fn add_variable(&mut self, variable: &ParsedVariable) {
        let name = &variable.name;
        self.config
            .reactive_paths
            .insert(name.clone(), SubstitutionType::SmartSubstitute);
        self.config
            .dynamic_binding_path_list
            .push(DynamicBindingPath::new(name.clone()));
        self.config.variables.push(name.clone());
        self.entity.set(name, Value::str(&variable.value));
        self.changed.push(self.qualified(name));
    }

    /// A variable is unchanged only when the tree holds exactly its text.
    fn update_variable(&mut self, variable: &ParsedVariable) {
        let name = &variable.name;
        let unchanged = matches!(
            self.entity.get(name),
            Some(Value::String(stored)) if *stored == variable.value
        );
        if !unchanged {
            self.entity.set(name, Value::str(&variable.value));
            self.changed.push(self.qualified(name));
        }
    }

    fn remove_variable(&mut self, name: &str) {
        self.config.reactive_paths.remove(name);
        self.config
            .dynamic_binding_path_list
            .retain(|binding| binding.key != name);
        self.config.variables.retain(|variable| variable != name);
        self.entity.unset(name);
        self.removed.push(self.qualified(name));
    }

    fn finish(mut self, previous: &EntityConfig) -> Reconciliation {
        if self.config != *previous {
            self.config.version = previous.version + 1;
        }
        debug!(
            "reconciled {}: {} changed, {} removed, config v{}",
            self.entity.name,
            self.changed.len(),
            self.removed.len(),
            self.config.version
        );
        Reconciliation {
            entity: self.entity,
            config: self.config,
            changed: self.changed,
            removed: self.removed,
        }
    }
}
