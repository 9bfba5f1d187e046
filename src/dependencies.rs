//! Extraction of the tree paths referenced by a reactive path's expression.

use crate::bindings::{binding_sources, is_code_path};
use crate::builtins;
use crate::entity::{Entity, EntityConfig, EntityType, SubstitutionType};
use crate::error::ParseError;
use crate::parser::{Expr, FunctionBody, Stmt, parse_expression};
use crate::path::{self, qualify, split_qualified};
use crate::stack::ensure_sufficient_stack;
use std::collections::{BTreeMap, BTreeSet};

/// References found in one piece of code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Paths rooted at a known entity, e.g. `Api1.data.users`.
    pub references: BTreeSet<String>,
    /// Free identifiers that name neither an entity nor a global.
    pub unresolved: BTreeSet<String>,
}

impl Extraction {
    fn merge(&mut self, other: Extraction) {
        self.references.extend(other.references);
        self.unresolved.extend(other.unresolved);
    }
}

/// Dependencies of one fully-qualified reactive path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathDependencies {
    pub references: BTreeSet<String>,
    pub unresolved: BTreeSet<String>,
    pub error: Option<ParseError>,
}

/// Extracts the entity references of one expression.
///
/// `this_entity` names the entity `this` stands for in JS object code.
pub fn extract_references<F>(code: &str, is_entity: F, this_entity: Option<&str>) -> Result<Extraction, ParseError>
where
    F: Fn(&str) -> bool,
{
    let expr = parse_expression(code)?;
    let mut collector = Collector {
        is_entity,
        this_entity,
        scopes: Vec::new(),
        found: Extraction::default(),
    };
    collector.walk(&expr);
    Ok(collector.found)
}

/// Shortens a reference to its longest prefix that exists in the tree.
///
/// `Api1.data.users[0]` becomes `Api1.data` while `data` is still empty, and
/// `Input1.text.length` becomes `Input1.text`.
pub fn trim_to_tree(reference: &str, tree: &BTreeMap<String, Entity>) -> String {
    let (name, rest) = split_qualified(reference);
    let Some(entity) = tree.get(name) else {
        return reference.to_string();
    };
    if rest.is_empty() || entity.contains(rest) {
        return reference.to_string();
    }
    for ancestor in path::ancestors(reference).into_iter().rev() {
        let (_, rest) = split_qualified(ancestor);
        if rest.is_empty() || entity.contains(rest) {
            return ancestor.to_string();
        }
    }
    name.to_string()
}

/// Dependencies of a single reactive path of `entity`, keyed by nothing but itself.
pub fn path_dependencies(
    entity: &Entity,
    config: &EntityConfig,
    property: &str,
    tree: &BTreeMap<String, Entity>,
) -> PathDependencies {
    let mut deps = PathDependencies::default();
    let kind = config
        .reactive_paths
        .get(property)
        .copied()
        .unwrap_or(SubstitutionType::Template);

    if kind != SubstitutionType::None {
        if let Some(raw) = entity.get(property) {
            let is_code = is_code_path(entity.entity_type, kind);
            let this_entity = entity.is_js_object().then_some(entity.name.as_str());
            let mut found = Extraction::default();
            for code in binding_sources(raw, is_code) {
                match extract_references(code, |name| tree.contains_key(name), this_entity) {
                    Ok(extraction) => found.merge(extraction),
                    Err(e) => {
                        deps.error = Some(e);
                        break;
                    }
                }
            }
            deps.references = found
                .references
                .iter()
                .map(|reference| trim_to_tree(reference, tree))
                .collect();
            deps.unresolved = found.unresolved;
        }
    }

    if let Some(declared) = config.dependency_map.get(property) {
        deps.references
            .extend(declared.iter().map(|dep| qualify(&entity.name, dep)));
    }
    deps
}

/// Dependencies of every reactive path of an entity, keyed by qualified path.
///
/// Widgets, actions, module inputs and the `appsmith` context contribute
/// their bindings; JS objects also declare `body` as depending on each of
/// their functions.
pub fn entity_dependencies(
    entity: &Entity,
    config: &EntityConfig,
    tree: &BTreeMap<String, Entity>,
) -> BTreeMap<String, PathDependencies> {
    let paths: Vec<&String> = match entity.entity_type {
        EntityType::JsAction => config
            .reactive_paths
            .keys()
            .chain(config.dependency_map.keys())
            .collect(),
        EntityType::Widget | EntityType::Action | EntityType::Appsmith | EntityType::ModuleInput => {
            config.reactive_paths.keys().collect()
        }
    };

    paths
        .into_iter()
        .map(|property| {
            (
                qualify(&entity.name, property),
                path_dependencies(entity, config, property, tree),
            )
        })
        .collect()
}

struct Collector<'a, F> {
    is_entity: F,
    this_entity: Option<&'a str>,
    scopes: Vec<BTreeSet<String>>,
    found: Extraction,
}

impl<F: Fn(&str) -> bool> Collector<'_, F> {
    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn record(&mut self, chain: String) {
        let (root, rest) = split_qualified(&chain);
        if root == "this" {
            if let Some(entity) = self.this_entity {
                let reference = qualify(entity, rest);
                self.found.references.insert(reference);
            }
            return;
        }
        if self.is_local(root) {
            return;
        }
        if (self.is_entity)(root) {
            self.found.references.insert(chain);
        } else if !builtins::is_global(root) {
            self.found.unresolved.insert(root.to_string());
        }
    }

    fn walk(&mut self, expr: &Expr) {
        ensure_sufficient_stack(|| self.walk_expr(expr));
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Undefined => {}
            Expr::This => self.record("this".to_string()),
            Expr::Ident(name) => self.record(name.clone()),
            Expr::Member { object, .. } => match static_chain(expr) {
                Some(chain) => self.record(chain),
                None => self.walk(object),
            },
            Expr::Index { object, index, .. } => match static_chain(expr) {
                Some(chain) => self.record(chain),
                None => {
                    self.walk(object);
                    self.walk(index);
                }
            },
            Expr::Array(items) => items.iter().for_each(|item| self.walk(item)),
            Expr::Object(entries) => entries.iter().for_each(|(_, value)| self.walk(value)),
            Expr::Call { callee, args, .. } => {
                self.walk(callee);
                args.iter().for_each(|arg| self.walk(arg));
            }
            Expr::Unary { operand, .. } => self.walk(operand),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                self.walk(lhs);
                self.walk(rhs);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.walk(test);
                self.walk(consequent);
                self.walk(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.walk(target);
                self.walk(value);
            }
            Expr::Function(function) => {
                self.scopes.push(function.params.iter().cloned().collect());
                match &function.body {
                    FunctionBody::Expr(body) => self.walk(body),
                    FunctionBody::Block(statements) => self.walk_block(statements),
                }
                self.scopes.pop();
            }
        }
    }

    fn walk_block(&mut self, statements: &[Stmt]) {
        // `const`/`let` shadow for the whole block.
        let declared = statements
            .iter()
            .filter_map(|statement| match statement {
                Stmt::Let { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        self.scopes.push(declared);
        for statement in statements {
            self.walk_statement(statement);
        }
        self.scopes.pop();
    }

    fn walk_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Let { init, .. } => {
                if let Some(init) = init {
                    self.walk(init);
                }
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.walk(value);
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.walk(test);
                self.walk_statement(consequent);
                if let Some(alternate) = alternate {
                    self.walk_statement(alternate);
                }
            }
            Stmt::Block(statements) => self.walk_block(statements),
            Stmt::Throw(value) | Stmt::Expr(value) => self.walk(value),
        }
    }
}

/// Dotted path of a member chain made only of names and literal indices.
fn static_chain(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::This => Some("this".to_string()),
        Expr::Member {
            object, property, ..
        } => static_chain(object).map(|base| format!("{}.{}", base, property)),
        Expr::Index { object, index, .. } => match index.as_ref() {
            Expr::Number(n) if *n >= 0.0 && n.fract() == 0.0 => {
                static_chain(object).map(|base| format!("{}[{}]", base, *n as usize))
            }
            Expr::Str(key) if is_identifier(key) => {
                static_chain(object).map(|base| format!("{}.{}", base, key))
            }
            _ => None,
        },
        _ => None,
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
