//! Interpreter that evaluates binding code against an explicit global scope.
//!
//! Nothing is visible to an expression except the entities handed in through
//! [`Scope`] and the built-in globals. Writes to globals land in the
//! sandbox's own overlay, which is dropped together with the sandbox, so an
//! expression can never modify the evaluated tree it reads from.

use crate::builtins::{self, Builtin};
use crate::error::EvalError;
use crate::parser::{
    AssignOp, BinaryOp, Expr, FunctionBody, LogicalOp, Stmt, UnaryOp, parse_expression,
};
use crate::path::MAX_ARRAY_LENGTH;
use crate::stack::ensure_sufficient_stack;
use crate::value::{Closure, Object, Value, format_number};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A side effect requested by an expression, executed after the pass by the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    ShowAlert { message: String, style: String },
    StoreValue { key: String, value: Value },
    NavigateTo { target: String, params: Value },
    RunAction { action: String, params: Value },
    ClearAction { action: String },
}

/// The globals injected for one evaluation.
#[derive(Clone, Copy)]
pub struct Scope<'t> {
    pub entities: &'t Object,
    pub actions: &'t BTreeSet<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_steps: usize,
    /// Longest array an assignment may grow.
    pub max_array_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_call_depth: 64,
            max_steps: 100_000,
            max_array_length: MAX_ARRAY_LENGTH,
        }
    }
}

/// Characters or array slots produced per charged step.
const UNITS_PER_STEP: usize = 16;

struct Frame {
    locals: Object,
    this: Value,
}

pub struct Sandbox<'t> {
    scope: Scope<'t>,
    limits: Limits,
    overlay: Object,
    frames: Vec<Frame>,
    effects: Vec<Effect>,
    steps: usize,
}

enum Flow {
    Normal,
    Return(Value),
}

impl<'t> Sandbox<'t> {
    pub fn new(scope: Scope<'t>, limits: Limits) -> Self {
        Sandbox {
            scope,
            limits,
            overlay: Object::new(),
            frames: vec![Frame {
                locals: Object::new(),
                this: Value::Undefined,
            }],
            effects: Vec::new(),
            steps: 0,
        }
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Value, EvalError> {
        let expr = parse_expression(source)?;
        self.eval(&expr)
    }

    /// Globals written by evaluated code; never visible outside this sandbox.
    pub fn overlay(&self) -> &Object {
        &self.overlay
    }

    pub fn record_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn frame(&self) -> &Frame {
        // The base frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn is_shadowed(&self, name: &str) -> bool {
        self.frame().locals.contains_key(name) || self.overlay.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(v) = self.frame().locals.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.overlay.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.scope.entities.get(name) {
            return Ok(v.clone());
        }
        builtins::global(name)
            .cloned()
            .ok_or_else(|| EvalError::Reference(name.to_string()))
    }

    /// Borrows a value straight out of the injected tree for a plain
    /// `Entity.a.b` chain, avoiding a clone of the whole entity.
    fn resolve_in_tree(&self, expr: &Expr) -> Option<&'t Value> {
        match expr {
            Expr::Ident(name) if !self.is_shadowed(name) => self.scope.entities.get(name),
            Expr::Member {
                object,
                property,
                optional: false,
            } => self.resolve_in_tree(object)?.properties()?.get(property),
            _ => None,
        }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.charge_steps(1)
    }

    fn charge_steps(&mut self, steps: usize) -> Result<(), EvalError> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.limits.max_steps {
            Err(EvalError::StepLimit(self.limits.max_steps))
        } else {
            Ok(())
        }
    }

    /// Charges the size of a produced string or array against the step budget.
    pub fn charge(&mut self, value: &Value) -> Result<(), EvalError> {
        let units = match value {
            Value::String(s) => s.len(),
            Value::Array(items) => items.len(),
            _ => 0,
        };
        self.charge_steps(units / UNITS_PER_STEP)
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        ensure_sufficient_stack(|| self.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::This => Ok(self.frame().this.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Object(entries) => {
                let mut map = Object::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                if let Some(found) = self.resolve_in_tree(expr) {
                    return Ok(found.clone());
                }
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                get_property(&target, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = property_key(&self.eval(index)?);
                get_property(&target, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, &lhs, &rhs)
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !lhs.truthy(),
                    LogicalOp::Or => lhs.truthy(),
                    LogicalOp::Nullish => !lhs.is_nullish(),
                };
                if short_circuit {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { target, op, value } => self.eval_assign(target, *op, value),
            Expr::Function(function) => {
                let frame = self.frame();
                Ok(Value::Function(Arc::new(Closure::new(
                    Arc::clone(function),
                    frame.locals.clone(),
                    frame.this.clone(),
                ))))
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Value, EvalError> {
        if op == UnaryOp::TypeOf {
            // `typeof missing` is "undefined", not a ReferenceError.
            let value = match operand {
                Expr::Ident(name) => self.lookup(name).unwrap_or_default(),
                other => self.eval(other)?,
            };
            return Ok(Value::str(value.type_of()));
        }
        let value = self.eval(operand)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::TypeOf => Value::str(value.type_of()),
        })
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], optional: bool) -> Result<Value, EvalError> {
        let (receiver, method) = match callee {
            Expr::Member {
                object, property, ..
            } => {
                if let Expr::Ident(name) = object.as_ref() {
                    if self.scope.actions.contains(name) && !self.is_shadowed(name) {
                        if let Some(effect) = self.action_effect(name, property, args)? {
                            self.record_effect(effect);
                            return Ok(Value::Undefined);
                        }
                    }
                }
                (Some(object.as_ref()), Some(property.clone()))
            }
            Expr::Index { object, index, .. } => {
                let key = property_key(&self.eval(index)?);
                (Some(object.as_ref()), Some(key))
            }
            _ => (None, None),
        };

        let (this, function) = match (receiver, method) {
            (Some(object), Some(method)) => {
                let target = self.eval(object)?;
                if target.is_nullish() && matches!(callee, Expr::Member { optional: true, .. } | Expr::Index { optional: true, .. }) {
                    return Ok(Value::Undefined);
                }
                if matches!(target, Value::String(_) | Value::Array(_) | Value::Number(_)) {
                    let values = self.eval_args(args)?;
                    if let Some(result) = builtins::call_method(self, &target, &method, values) {
                        let value = result?;
                        self.charge(&value)?;
                        return Ok(value);
                    }
                    return Err(EvalError::Type(format!("{} is not a function", describe(callee))));
                }
                let function = get_property(&target, &method)?;
                (target, function)
            }
            _ => (Value::Undefined, self.eval(callee)?),
        };

        if optional && function.is_nullish() {
            return Ok(Value::Undefined);
        }
        if !function.is_callable() {
            return Err(EvalError::Type(format!("{} is not a function", describe(callee))));
        }
        let values = self.eval_args(args)?;
        self.call_value(&function, this, values)
    }

    fn action_effect(&mut self, action: &str, method: &str, args: &[Expr]) -> Result<Option<Effect>, EvalError> {
        let effect = match method {
            "run" => {
                let params = match args.first() {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Effect::RunAction {
                    action: action.to_string(),
                    params,
                }
            }
            "clear" => Effect::ClearAction {
                action: action.to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(effect))
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    /// Invokes a callable. `this` is the receiver of a method call, or
    /// `undefined`, in which case the closure's captured `this` is used.
    pub fn call_value(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match callee {
            Value::Native(builtin) => self.call_native(*builtin, args),
            Value::Function(closure) => {
                if self.frames.len() > self.limits.max_call_depth {
                    return Err(EvalError::CallDepth(self.limits.max_call_depth));
                }
                let mut locals = closure.captured.clone();
                for (i, param) in closure.function.params.iter().enumerate() {
                    locals.insert(param.clone(), args.get(i).cloned().unwrap_or_default());
                }
                let this = if this.is_undefined() {
                    closure.this.clone()
                } else {
                    this
                };
                self.frames.push(Frame { locals, this });
                let result = match &closure.function.body {
                    FunctionBody::Expr(body) => self.eval(body),
                    FunctionBody::Block(statements) => self.exec_block(statements).map(|flow| match flow {
                        Flow::Return(value) => value,
                        Flow::Normal => Value::Undefined,
                    }),
                };
                self.frames.pop();
                result
            }
            other => Err(EvalError::Type(format!("{} is not a function", other.type_of()))),
        }
    }

    fn call_native(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Value, EvalError> {
        let result = builtins::call_builtin(self, builtin, args)?;
        self.charge(&result)?;
        Ok(result)
    }

    fn exec_block(&mut self, statements: &[Stmt]) -> Result<Flow, EvalError> {
        for statement in statements {
            if let Flow::Return(value) = self.exec(statement)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, statement: &Stmt) -> Result<Flow, EvalError> {
        self.tick()?;
        match statement {
            Stmt::Let { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                self.frame_mut().locals.insert(name.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.truthy() {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(statements) => self.exec_block(statements),
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                let message = match &value {
                    Value::Object(map) => map
                        .get("message")
                        .map(Value::to_js_string)
                        .unwrap_or_else(|| value.to_js_string()),
                    other => other.to_js_string(),
                };
                Err(EvalError::Thrown(message))
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval_assign(&mut self, target: &Expr, op: AssignOp, value: &Expr) -> Result<Value, EvalError> {
        let rhs = self.eval(value)?;
        let value = match op {
            AssignOp::Set => rhs,
            AssignOp::Add => {
                let current = self.eval(target)?;
                self.binary(BinaryOp::Add, &current, &rhs)?
            }
            AssignOp::Sub => binary(BinaryOp::Sub, &self.eval(target)?, &rhs),
        };

        let (root, keys) = self.assignment_chain(target)?;
        let max_length = self.limits.max_array_length;
        let slot = match root {
            Root::This => &mut self.frame_mut().this,
            Root::Name(name) => {
                if self.frame().locals.contains_key(&name) {
                    self.frame_mut()
                        .locals
                        .get_mut(&name)
                        .ok_or_else(|| EvalError::Reference(name.clone()))?
                } else {
                    if !self.overlay.contains_key(&name) {
                        // Copy-on-write: the tree itself is never touched.
                        let initial = if keys.is_empty() {
                            Value::Undefined
                        } else {
                            self.lookup(&name)?
                        };
                        self.overlay.insert(name.clone(), initial);
                    }
                    self.overlay
                        .get_mut(&name)
                        .ok_or_else(|| EvalError::Reference(name.clone()))?
                }
            }
        };
        let grown = write_chain(slot, &keys, value.clone(), max_length)?;
        self.charge_steps(grown / UNITS_PER_STEP)?;
        Ok(value)
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        let result = binary(op, lhs, rhs);
        self.charge(&result)?;
        Ok(result)
    }

    fn assignment_chain(&mut self, target: &Expr) -> Result<(Root, Vec<String>), EvalError> {
        match target {
            Expr::Ident(name) => Ok((Root::Name(name.clone()), Vec::new())),
            Expr::This => Ok((Root::This, Vec::new())),
            Expr::Member { object, property, .. } => {
                let (root, mut keys) = self.assignment_chain(object)?;
                keys.push(property.clone());
                Ok((root, keys))
            }
            Expr::Index { object, index, .. } => {
                let (root, mut keys) = self.assignment_chain(object)?;
                let key = property_key(&self.eval(index)?);
                keys.push(key);
                Ok((root, keys))
            }
            _ => Err(EvalError::Type("invalid assignment target".to_string())),
        }
    }
}

enum Root {
    Name(String),
    This,
}

/// Writes `value` below `slot` and returns how many array slots were added.
fn write_chain(slot: &mut Value, keys: &[String], value: Value, max_length: usize) -> Result<usize, EvalError> {
    let Some((key, rest)) = keys.split_first() else {
        *slot = value;
        return Ok(0);
    };
    match slot {
        Value::Object(_) | Value::Function(_) => {
            let Some(properties) = slot.properties_mut() else {
                return Ok(0);
            };
            write_chain(properties.entry(key.clone()).or_default(), rest, value, max_length)
        }
        Value::Array(items) => {
            let index: usize = key
                .parse()
                .map_err(|_| EvalError::Type(format!("cannot set property '{}' of array", key)))?;
            if index >= max_length {
                return Err(EvalError::Range(format!("Invalid array length {}", index.saturating_add(1))));
            }
            let grown = (index + 1).saturating_sub(items.len());
            if grown > 0 {
                items.resize(index + 1, Value::Undefined);
            }
            Ok(grown + write_chain(&mut items[index], rest, value, max_length)?)
        }
        other => Err(EvalError::Type(format!(
            "Cannot set properties of {} (setting '{}')",
            other.to_js_string(),
            key
        ))),
    }
}

pub fn get_property(target: &Value, key: &str) -> Result<Value, EvalError> {
    match target {
        Value::Undefined | Value::Null => Err(EvalError::Type(format!(
            "Cannot read properties of {} (reading '{}')",
            target.to_js_string(),
            key
        ))),
        Value::Object(map) => Ok(map.get(key).cloned().unwrap_or_default()),
        Value::Function(closure) => Ok(closure.properties.get(key).cloned().unwrap_or_default()),
        Value::Array(items) => Ok(if key == "length" {
            Value::Number(items.len() as f64)
        } else {
            key.parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()
        }),
        Value::String(s) => Ok(if key == "length" {
            Value::Number(s.chars().count() as f64)
        } else {
            key.parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default()
        }),
        _ => Ok(Value::Undefined),
    }
}

fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_js_string(),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
            if stringy(lhs) || stringy(rhs) {
                Value::String(format!("{}{}", lhs.to_js_string(), rhs.to_js_string()))
            } else {
                Value::Number(lhs.to_number() + rhs.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinaryOp::Eq => Value::Bool(lhs.loose_equals(rhs)),
        BinaryOp::NotEq => Value::Bool(!lhs.loose_equals(rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs.strict_equals(rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!lhs.strict_equals(rhs)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (lhs, rhs) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => lhs.to_number().partial_cmp(&rhs.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", describe(object), property),
        Expr::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}
