/*!
# Data Tree Evaluator

A reactive evaluation engine for the data tree of a low-code application, built in Rust.

## Overview

An application is a tree of named entities: widgets, actions, JS objects, module
inputs and the global `appsmith` context. Property values may contain `{{ … }}`
bindings that reference other entities. The engine keeps an evaluated copy of
the tree in sync with the raw one, re-evaluating only what an edit affects.

## Architecture

### Expression Layer
- **lexer** / **parser**: the subset of JavaScript used in bindings and JS objects
- **value**: dynamic values (`undefined`, `null`, numbers, strings, arrays, objects, functions)
- **builtins**: global functions and methods available to expressions
- **sandbox**: interpreter with an explicit global scope and step and call-depth limits
- **stack**: on-demand stack growth for the recursive passes

### Tree Layer
- **entity**: entities, their configs and substitution types
- **path**: dotted and indexed property paths
- **bindings**: `{{ }}` segmentation and substitution
- **jsobject**: parsing of JS object source into functions and variables
- **patcher**: reconciliation of a JS object with its parsed body

### Dependency Layer
- **dependencies**: extraction of referenced paths from expressions
- **node**: graph nodes and the vector/ordered set hybrid for dependents
- **graph**: topological order, cycle detection and re-evaluation sets

### Orchestration
- **engine**: queued edits, full and incremental passes, snapshots
- **worker**: a dedicated evaluation thread fed over a channel
- **config**: limits and logging switches, from JSON and the environment
- **loader**: JSON tree documents

## Design Highlights

- Edits only enqueue; `process_pending` applies them in order and runs one pass
- Snapshots are `Arc<EvaluatedTree>` replaced after each pass
- Errors are recorded per path and never abort a pass
- Circular references are detected with Tarjan's algorithm and marked
- Dependents are stored in a vector that turns into an ordered set when it grows

## Usage

```
use datatree::engine::DataTreeEvaluator;
use datatree::entity::{Entity, EntityConfig, EntityType, SubstitutionType};

let mut evaluator = DataTreeEvaluator::default();
evaluator
    .register_entity(
        Entity::create("Input1", EntityType::Widget).with_property("text", "hello"),
        EntityConfig::default(),
    )
    .unwrap();
evaluator
    .register_entity(
        Entity::create("Text1", EntityType::Widget).with_property("text", "{{Input1.text}} world"),
        EntityConfig::with_bindings(&[("text", SubstitutionType::Template)]),
    )
    .unwrap();
evaluator.process_pending().unwrap();
assert_eq!(
    evaluator.snapshot().get("Text1.text").and_then(|v| v.as_str()),
    Some("hello world")
);
```
*/

pub mod bindings;
pub mod builtins;
pub mod config;
pub mod dependencies;
pub mod engine;
pub mod entity;
pub mod error;
pub mod graph;
pub mod jsobject;
pub mod lexer;
pub mod loader;
pub mod node;
pub mod parser;
pub mod patcher;
pub mod path;
pub mod sandbox;
pub mod stack;
pub mod value;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{DataTreeEvaluator, Edit, EvaluatedTree, PassReport};
pub use entity::{Entity, EntityConfig, EntityType, SubstitutionType};
pub use error::{EngineError, ErrorKind, EvaluationError};
pub use graph::DependencyGraph;
pub use value::Value;
pub use worker::EvaluationWorker;
