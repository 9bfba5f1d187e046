//! The evaluation orchestrator.
//!
//! Edits are queued and applied in submission order by
//! [`DataTreeEvaluator::process_pending`], which then runs one pass: the
//! touched reactive paths are re-extracted, cycles are re-checked, and the
//! re-evaluation set is evaluated in dependency order. Each pass publishes a
//! fresh [`EvaluatedTree`] snapshot.

use crate::bindings::{is_code_path, is_dynamic_value, substitute};
use crate::config::EngineConfig;
use crate::dependencies::path_dependencies;
use crate::entity::{DynamicBindingPath, Entity, EntityConfig, EntityType, SubstitutionType};
use crate::error::{EngineError, EvaluationError, ParseError};
use crate::graph::DependencyGraph;
use crate::jsobject::{ParsedJsBody, parse_js_object};
use crate::patcher::{Reconciliation, reconcile_js_collection};
use crate::path::{self, overlaps, qualify, split_qualified};
use crate::sandbox::{Effect, Sandbox, Scope};
use crate::value::{Object, Value};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::mem;
use std::sync::Arc;

lazy_static! {
    static ref ENTITY_NAME: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

/// Evaluated values keyed by entity name, plus per-path error markers.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EvaluatedTree {
    entities: Object,
    errors: BTreeMap<String, EvaluationError>,
}

impl EvaluatedTree {
    pub fn entities(&self) -> &Object {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&Value> {
        self.entities.get(name)
    }

    /// Value at a fully-qualified path such as `Table1.selectedRow.id`.
    pub fn get(&self, qualified: &str) -> Option<&Value> {
        path::get(&self.entities, qualified)
    }

    pub fn error(&self, qualified: &str) -> Option<&EvaluationError> {
        self.errors.get(qualified)
    }

    pub fn errors(&self) -> &BTreeMap<String, EvaluationError> {
        &self.errors
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.entities.clone()).to_json()
    }
}

/// A change waiting for the next pass.
#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    SetValue {
        entity: String,
        path: String,
        value: Value,
    },
    JsObjectParse {
        entity: String,
        body: ParsedJsBody,
    },
    JsObjectSource {
        entity: String,
        source: String,
    },
    Register {
        entity: Entity,
        config: EntityConfig,
    },
    Remove {
        entity: String,
    },
}

impl Edit {
    pub fn entity_name(&self) -> &str {
        match self {
            Edit::SetValue { entity, .. }
            | Edit::JsObjectParse { entity, .. }
            | Edit::JsObjectSource { entity, .. }
            | Edit::Remove { entity } => entity,
            Edit::Register { entity, .. } => &entity.name,
        }
    }
}

/// What one pass did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PassReport {
    pub full: bool,
    /// Evaluation order of the paths in the re-evaluation set.
    pub order: Vec<String>,
    /// Paths that were evaluated, i.e. `order` minus cyclic paths.
    pub evaluated: Vec<String>,
    /// Error markers written during this pass.
    pub errors: BTreeMap<String, EvaluationError>,
    /// Edits that could not be applied, e.g. to an unknown entity.
    pub skipped: Vec<String>,
    pub effects: Vec<Effect>,
}

/// Work accumulated by applied edits and not yet evaluated.
#[derive(Clone, Debug, Default)]
struct Delta {
    full: bool,
    /// Qualified paths whose raw value changed.
    changed: BTreeSet<String>,
    /// Reactive paths whose references must be re-extracted.
    touched: BTreeSet<String>,
    /// Reactive paths that no longer exist.
    removed: BTreeSet<String>,
    /// Entities whose evaluated object must be rebuilt from the raw tree.
    entities: BTreeSet<String>,
}

impl Delta {
    fn is_empty(&self) -> bool {
        !self.full && self.changed.is_empty() && self.touched.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct DataTreeEvaluator {
    config: EngineConfig,
    tree: BTreeMap<String, Entity>,
    configs: BTreeMap<String, EntityConfig>,
    graph: DependencyGraph,
    /// Free identifier -> reactive paths that mention it.
    unresolved: BTreeMap<String, BTreeSet<String>>,
    node_unresolved: BTreeMap<String, BTreeSet<String>>,
    /// JS object sources that failed to parse, keyed by `<entity>.body`.
    source_errors: BTreeMap<String, EvaluationError>,
    pending: VecDeque<Edit>,
    dirty: Delta,
    snapshot: Arc<EvaluatedTree>,
}

impl Default for DataTreeEvaluator {
    fn default() -> Self {
        DataTreeEvaluator::new(EngineConfig::default())
    }
}

impl DataTreeEvaluator {
    pub fn new(config: EngineConfig) -> Self {
        DataTreeEvaluator {
            config,
            tree: BTreeMap::new(),
            configs: BTreeMap::new(),
            graph: DependencyGraph::new(),
            unresolved: BTreeMap::new(),
            node_unresolved: BTreeMap::new(),
            source_errors: BTreeMap::new(),
            pending: VecDeque::new(),
            dirty: Delta {
                full: true,
                ..Delta::default()
            },
            snapshot: Arc::new(EvaluatedTree::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest published evaluated tree.
    pub fn snapshot(&self) -> Arc<EvaluatedTree> {
        Arc::clone(&self.snapshot)
    }

    /// Raw entity as last applied.
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.tree.get(name)
    }

    pub fn entity_config(&self, name: &str) -> Option<&EntityConfig> {
        self.configs.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &String> {
        self.tree.keys()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn apply_entity_edit(&mut self, entity: &str, path: &str, value: impl Into<Value>) {
        self.pending.push_back(Edit::SetValue {
            entity: entity.to_string(),
            path: path.to_string(),
            value: value.into(),
        });
    }

    pub fn apply_js_object_parse(&mut self, entity: &str, body: ParsedJsBody) {
        self.pending.push_back(Edit::JsObjectParse {
            entity: entity.to_string(),
            body,
        });
    }

    pub fn apply_js_object_source(&mut self, entity: &str, source: &str) {
        self.pending.push_back(Edit::JsObjectSource {
            entity: entity.to_string(),
            source: source.to_string(),
        });
    }

    /// Queues a new entity. The name must be an identifier and must not be
    /// taken by a registered entity that is not queued for removal.
    pub fn register_entity(&mut self, entity: Entity, config: EntityConfig) -> Result<(), EngineError> {
        if !ENTITY_NAME.is_match(&entity.name) {
            return Err(EngineError::InvalidName(entity.name));
        }
        let exists = self
            .pending
            .iter()
            .fold(self.tree.contains_key(&entity.name), |exists, edit| match edit {
                Edit::Register { entity: queued, .. } if queued.name == entity.name => true,
                Edit::Remove { entity: name } if *name == entity.name => false,
                _ => exists,
            });
        if exists {
            return Err(EngineError::DuplicateEntity(entity.name));
        }
        self.pending.push_back(Edit::Register { entity, config });
        Ok(())
    }

    /// Queues the removal of an entity and drops its still-queued edits.
    pub fn remove_entity(&mut self, name: &str) {
        let before = self.pending.len();
        self.pending.retain(|edit| edit.entity_name() != name);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!("dropped {} queued edit(s) of removed entity {}", dropped, name);
        }
        self.pending.push_back(Edit::Remove {
            entity: name.to_string(),
        });
    }

    /// Re-extracts and re-evaluates everything on the next pass.
    pub fn evaluate_full(&mut self) -> Result<PassReport, EngineError> {
        self.dirty.full = true;
        self.process_pending()
    }

    /// Applies every queued edit in order, then runs one pass.
    ///
    /// A structural inconsistency aborts the call; the offending edit is
    /// dropped, later edits stay queued and already applied work is
    /// evaluated by the next call.
    pub fn process_pending(&mut self) -> Result<PassReport, EngineError> {
        let mut skipped = Vec::new();
        while let Some(edit) = self.pending.pop_front() {
            if let Some(reason) = self.apply(edit)? {
                warn!("skipped edit: {}", reason);
                skipped.push(reason);
            }
        }

        let mut report = self.run_pass();
        report.skipped = skipped;
        if self.config.log_passes {
            info!(
                "{} pass: {} evaluated, {} error(s), {} effect(s), {} skipped",
                if report.full { "full" } else { "incremental" },
                report.evaluated.len(),
                report.errors.len(),
                report.effects.len(),
                report.skipped.len()
            );
        }
        Ok(report)
    }

    /// Applies one edit to the raw tree. `Ok(Some(reason))` means it was skipped.
    fn apply(&mut self, edit: Edit) -> Result<Option<String>, EngineError> {
        match edit {
            Edit::SetValue {
                entity,
                path,
                value,
            } => Ok(self.apply_value(&entity, &path, value)),
            Edit::JsObjectParse { entity, body } => self.apply_parse(&entity, &body),
            Edit::JsObjectSource { entity, source } => self.apply_source(&entity, &source),
            Edit::Register { entity, config } => Ok(self.apply_register(entity, config)),
            Edit::Remove { entity } => Ok(self.apply_remove(&entity)),
        }
    }

    fn apply_value(&mut self, name: &str, property: &str, value: Value) -> Option<String> {
        let Some(entity) = self.tree.get_mut(name) else {
            return Some(format!("{}.{}: unknown entity", name, property));
        };
        if property.is_empty() {
            return Some(format!("{}: empty property path", name));
        }
        if !path::in_bounds(property) {
            return Some(format!("{}.{}: array index out of range", name, property));
        }
        if entity.is_js_object() && property == "body" {
            if let Value::String(source) = &value {
                let source = source.clone();
                return match self.apply_source(name, &source) {
                    Ok(skip) => skip,
                    Err(e) => Some(e.to_string()),
                };
            }
        }

        entity.set(property, value.clone());
        let config = self.configs.entry(name.to_string()).or_default();
        let dynamic = matches!(&value, Value::String(text) if is_dynamic_value(text));
        if let Some(kind) = config.binding_paths.get(property).copied() {
            if dynamic {
                config.reactive_paths.entry(property.to_string()).or_insert(kind);
                if !config.is_dynamic(property) {
                    config
                        .dynamic_binding_path_list
                        .push(DynamicBindingPath::new(property));
                }
            } else {
                config.dynamic_binding_path_list.retain(|p| p.key != property);
            }
        }

        let touched: Vec<String> = config
            .reactive_paths
            .keys()
            .filter(|p| overlaps(p, property))
            .map(|p| qualify(name, p))
            .collect();
        self.dirty.touched.extend(touched);
        self.dirty.changed.insert(qualify(name, property));
        self.dirty.entities.insert(name.to_string());
        None
    }

    fn apply_source(&mut self, name: &str, source: &str) -> Result<Option<String>, EngineError> {
        let Some(entity) = self.tree.get_mut(name) else {
            return Ok(Some(format!("{}: unknown entity", name)));
        };
        if !entity.is_js_object() {
            return Ok(Some(EngineError::NotJsObject(name.to_string()).to_string()));
        }
        entity.set("body", Value::str(source));
        let body_path = qualify(name, "body");
        self.dirty.changed.insert(body_path.clone());
        self.dirty.entities.insert(name.to_string());

        match parse_js_object(source) {
            Ok(body) => {
                self.source_errors.remove(&body_path);
                self.apply_parse(name, &body)
            }
            Err(e) => {
                self.record_source_error(&body_path, &e);
                Ok(None)
            }
        }
    }

    fn record_source_error(&mut self, body_path: &str, error: &ParseError) {
        warn!("cannot parse {}: {}", body_path, error);
        self.source_errors
            .insert(body_path.to_string(), EvaluationError::parse(error));
    }

    fn apply_parse(&mut self, name: &str, body: &ParsedJsBody) -> Result<Option<String>, EngineError> {
        let (Some(entity), Some(config)) = (self.tree.get(name), self.configs.get(name)) else {
            return Ok(Some(format!("{}: unknown entity", name)));
        };
        if !entity.is_js_object() {
            return Ok(Some(EngineError::NotJsObject(name.to_string()).to_string()));
        }
        let reconciliation = reconcile_js_collection(entity, config, body)?;
        if reconciliation.is_noop() {
            if reconciliation.config != *config {
                self.configs.insert(name.to_string(), reconciliation.config);
            }
            return Ok(None);
        }
        let body_changed = reconciliation.config.body_dependencies() != config.body_dependencies();
        let Reconciliation {
            entity,
            config,
            changed,
            removed,
        } = reconciliation;

        for path in &removed {
            self.dirty.removed.insert(path.clone());
            self.dirty.changed.insert(path.clone());
        }
        self.dirty.touched.extend(changed.iter().cloned());
        self.dirty.changed.extend(changed);
        if body_changed {
            let body_path = qualify(name, "body");
            self.dirty.touched.insert(body_path.clone());
            self.dirty.changed.insert(body_path);
        }
        self.dirty.entities.insert(name.to_string());
        self.tree.insert(name.to_string(), entity);
        self.configs.insert(name.to_string(), config);
        Ok(None)
    }

    fn apply_register(&mut self, entity: Entity, mut config: EntityConfig) -> Option<String> {
        let name = entity.name.clone();
        if self.tree.contains_key(&name) {
            return Some(EngineError::DuplicateEntity(name).to_string());
        }
        if entity.is_js_object() && !config.reactive_paths.contains_key("body") {
            config
                .reactive_paths
                .insert("body".to_string(), SubstitutionType::None);
            config.dependency_map.entry("body".to_string()).or_default();
        }
        debug!("registered {} ({:?})", name, entity.entity_type);

        self.dirty
            .touched
            .extend(config.reactive_paths.keys().map(|p| qualify(&name, p)));
        if let Some(waiting) = self.unresolved.get(&name) {
            self.dirty.touched.extend(waiting.iter().cloned());
        }
        self.dirty.changed.insert(name.clone());
        self.dirty.entities.insert(name.clone());
        self.tree.insert(name.clone(), entity);
        self.configs.insert(name, config);
        None
    }

    fn apply_remove(&mut self, name: &str) -> Option<String> {
        let Some(entity) = self.tree.remove(name) else {
            return Some(format!("{}: unknown entity", name));
        };
        let config = self.configs.remove(name).unwrap_or_default();
        debug!("removed {} ({:?})", name, entity.entity_type);

        for property in config.reactive_paths.keys() {
            let path = qualify(name, property);
            self.dirty.touched.remove(&path);
            self.dirty.removed.insert(path);
        }
        // Dependents now reference a missing entity.
        self.dirty.touched.extend(
            self.graph
                .dependents_of(name)
                .into_iter()
                .filter(|p| split_qualified(p).0 != name),
        );
        self.dirty.changed.retain(|p| split_qualified(p).0 != name);
        self.dirty.changed.insert(name.to_string());
        self.dirty.entities.insert(name.to_string());
        self.source_errors.retain(|p, _| split_qualified(p).0 != name);
        None
    }

    fn reactive_kind<'a>(&'a self, qualified: &'a str) -> Option<(&'a Entity, &'a EntityConfig, &'a str, SubstitutionType)> {
        let (name, property) = split_qualified(qualified);
        let entity = self.tree.get(name)?;
        let config = self.configs.get(name)?;
        let kind = *config.reactive_paths.get(property)?;
        Some((entity, config, property, kind))
    }

    fn reextract(&mut self, qualified: &str) {
        let Some((entity, config, property, _)) = self.reactive_kind(qualified) else {
            return;
        };
        let deps = path_dependencies(entity, config, property, &self.tree);
        if let Some(error) = &deps.error {
            debug!("cannot extract dependencies of {}: {}", qualified, error);
        }
        self.set_unresolved(qualified, deps.unresolved);
        self.graph.set_references(qualified, deps.references);
    }

    fn set_unresolved(&mut self, qualified: &str, names: BTreeSet<String>) {
        if let Some(old) = self.node_unresolved.remove(qualified) {
            for name in old {
                if let Some(paths) = self.unresolved.get_mut(&name) {
                    paths.remove(qualified);
                    if paths.is_empty() {
                        self.unresolved.remove(&name);
                    }
                }
            }
        }
        for name in &names {
            self.unresolved
                .entry(name.clone())
                .or_default()
                .insert(qualified.to_string());
        }
        if !names.is_empty() {
            self.node_unresolved.insert(qualified.to_string(), names);
        }
    }

    fn run_pass(&mut self) -> PassReport {
        let delta = mem::take(&mut self.dirty);
        let mut report = PassReport {
            full: delta.full,
            ..PassReport::default()
        };
        if delta.is_empty() {
            return report;
        }

        for path in &delta.removed {
            if self.reactive_kind(path).is_none() {
                self.graph.remove_node(path);
                self.set_unresolved(path, BTreeSet::new());
            }
        }

        let targets: BTreeSet<String> = if delta.full {
            let all: Vec<String> = self
                .configs
                .iter()
                .flat_map(|(name, config)| config.reactive_paths.keys().map(move |p| qualify(name, p)))
                .collect();
            for path in &all {
                self.reextract(path);
            }
            let cycles = self.graph.detect_cycles();
            for cycle in cycles {
                warn!("circular dependency: {}", cycle.join(" -> "));
            }
            all.into_iter().collect()
        } else {
            for path in &delta.touched {
                self.reextract(path);
            }
            let mut checked = delta.touched.clone();
            checked.extend(delta.removed.iter().cloned());
            let cycles = self.graph.recheck_cycles(&checked);
            for cycle in cycles.iter().filter(|c| c.iter().any(|p| checked.contains(p))) {
                warn!("circular dependency: {}", cycle.join(" -> "));
            }
            let seeds: Vec<String> = delta
                .changed
                .iter()
                .chain(delta.touched.iter())
                .chain(delta.removed.iter())
                .cloned()
                .collect();
            self.graph.reevaluation_set(&seeds)
        };

        let mut next = EvaluatedTree::clone(&self.snapshot);
        let rebuild: Vec<String> = if delta.full {
            next.entities.retain(|name, _| self.tree.contains_key(name));
            self.tree.keys().cloned().collect()
        } else {
            delta.entities.iter().cloned().collect()
        };
        for name in &rebuild {
            self.rebuild_entity(&mut next, name, &targets);
        }
        next.errors
            .retain(|path, _| self.reactive_kind(path).is_some() && !targets.contains(path));

        report.order = self.graph.topo_sort(&targets);
        let actions: BTreeSet<String> = self
            .tree
            .values()
            .filter(|e| e.entity_type == EntityType::Action)
            .map(|e| e.name.clone())
            .collect();
        let limits = self.config.limits();

        for path in &report.order {
            let Some((entity, _, property, kind)) = self.reactive_kind(path) else {
                continue;
            };
            if let Some(cycle) = self.graph.cycle_of(path) {
                let marker = EvaluationError::circular(cycle);
                write_value(&mut next.entities, path, Value::Undefined);
                next.errors.insert(path.clone(), marker.clone());
                report.errors.insert(path.clone(), marker);
                continue;
            }

            let raw = entity.get(property).cloned().unwrap_or_default();
            let is_code = is_code_path(entity.entity_type, kind);
            let (result, effects) = {
                let scope = Scope {
                    entities: &next.entities,
                    actions: &actions,
                };
                let mut sandbox = Sandbox::new(scope, limits);
                let result = substitute(&raw, kind, is_code, |code| sandbox.eval_source(code));
                (result, sandbox.take_effects())
            };
            report.effects.extend(effects);
            report.evaluated.push(path.clone());

            match result {
                Ok(value) => {
                    write_value(&mut next.entities, path, value);
                }
                Err(e) => {
                    let marker = EvaluationError::runtime(&e);
                    debug!("{} failed: {}", path, marker.message);
                    write_value(&mut next.entities, path, Value::Undefined);
                    next.errors.insert(path.clone(), marker.clone());
                    report.errors.insert(path.clone(), marker);
                }
            }
        }

        for (path, marker) in &self.source_errors {
            next.errors.insert(path.clone(), marker.clone());
            report.errors.insert(path.clone(), marker.clone());
        }

        self.snapshot = Arc::new(next);
        report
    }

    /// Rebuilds an entity's evaluated object from its raw properties, keeping
    /// the previous value of every reactive path that is not re-evaluated.
    fn rebuild_entity(&self, next: &mut EvaluatedTree, name: &str, targets: &BTreeSet<String>) {
        let Some(entity) = self.tree.get(name) else {
            next.entities.remove(name);
            return;
        };
        let previous = next.entities.remove(name);
        let mut rebuilt = Value::Object(entity.properties.clone());

        if let (Some(previous), Some(config)) = (previous, self.configs.get(name)) {
            for property in config.reactive_paths.keys() {
                if targets.contains(&qualify(name, property)) {
                    continue;
                }
                if let Some(value) = previous.properties().and_then(|p| path::get(p, property)) {
                    if let Some(map) = rebuilt.as_object_mut() {
                        put_value(map, property, value.clone());
                    }
                }
            }
        }
        next.entities.insert(name.to_string(), rebuilt);
    }
}

fn write_value(entities: &mut Object, qualified: &str, value: Value) {
    put_value(entities, qualified, value);
}

/// Writes a value, carrying the properties of whatever was there before
/// over to a new function (a JS function keeps its `data`).
fn put_value(root: &mut Object, path: &str, mut value: Value) {
    if let Value::Function(closure) = &mut value {
        if let Some(old) = path::get(root, path).and_then(Value::properties) {
            let properties = &mut Arc::make_mut(closure).properties;
            for (key, child) in old {
                if key != "body" {
                    properties.entry(key.clone()).or_insert_with(|| child.clone());
                }
            }
        }
    }
    path::set(root, path, value);
}
