//! Globals and methods available to every expression.

use crate::error::EvalError;
use crate::sandbox::{Effect, Sandbox};
use crate::value::{Object, Value, format_number};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FLOAT_PREFIX: Regex =
        Regex::new(r"^[+-]?(Infinity|[0-9]+\.?[0-9]*(?:[eE][+-]?[0-9]+)?|\.[0-9]+(?:[eE][+-]?[0-9]+)?)")
            .unwrap();
    static ref INT_PREFIX: Regex = Regex::new(r"^[+-]?[0-9A-Za-z]+").unwrap();
    static ref GLOBALS: Object = build_globals();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    MathAbs,
    MathCeil,
    MathFloor,
    MathRound,
    MathMax,
    MathMin,
    MathPow,
    MathSqrt,
    JsonStringify,
    JsonParse,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    StringCtor,
    NumberCtor,
    BooleanCtor,
    ArrayIsArray,
    ParseInt,
    ParseFloat,
    IsNaN,
    ShowAlert,
    StoreValue,
    NavigateTo,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::MathAbs => "abs",
            Builtin::MathCeil => "ceil",
            Builtin::MathFloor => "floor",
            Builtin::MathRound => "round",
            Builtin::MathMax => "max",
            Builtin::MathMin => "min",
            Builtin::MathPow => "pow",
            Builtin::MathSqrt => "sqrt",
            Builtin::JsonStringify => "stringify",
            Builtin::JsonParse => "parse",
            Builtin::ObjectKeys => "keys",
            Builtin::ObjectValues => "values",
            Builtin::ObjectEntries => "entries",
            Builtin::StringCtor => "String",
            Builtin::NumberCtor => "Number",
            Builtin::BooleanCtor => "Boolean",
            Builtin::ArrayIsArray => "isArray",
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
            Builtin::IsNaN => "isNaN",
            Builtin::ShowAlert => "showAlert",
            Builtin::StoreValue => "storeValue",
            Builtin::NavigateTo => "navigateTo",
        }
    }
}

/// Names every expression can see besides the tree's entities.
pub fn global(name: &str) -> Option<&'static Value> {
    GLOBALS.get(name)
}

pub fn is_global(name: &str) -> bool {
    GLOBALS.contains_key(name)
}

fn build_globals() -> Object {
    fn namespace(entries: &[Builtin]) -> Value {
        Value::Object(
            entries
                .iter()
                .map(|b| (b.name().to_string(), Value::Native(*b)))
                .collect(),
        )
    }

    let mut globals = Object::new();

    let mut math = namespace(&[
        Builtin::MathAbs,
        Builtin::MathCeil,
        Builtin::MathFloor,
        Builtin::MathRound,
        Builtin::MathMax,
        Builtin::MathMin,
        Builtin::MathPow,
        Builtin::MathSqrt,
    ]);
    if let Some(map) = math.as_object_mut() {
        map.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    }
    globals.insert("Math".to_string(), math);
    globals.insert(
        "JSON".to_string(),
        namespace(&[Builtin::JsonStringify, Builtin::JsonParse]),
    );
    globals.insert(
        "Object".to_string(),
        namespace(&[
            Builtin::ObjectKeys,
            Builtin::ObjectValues,
            Builtin::ObjectEntries,
        ]),
    );
    globals.insert("Array".to_string(), namespace(&[Builtin::ArrayIsArray]));

    for builtin in [
        Builtin::StringCtor,
        Builtin::NumberCtor,
        Builtin::BooleanCtor,
        Builtin::ParseInt,
        Builtin::ParseFloat,
        Builtin::IsNaN,
        Builtin::ShowAlert,
        Builtin::StoreValue,
        Builtin::NavigateTo,
    ] {
        globals.insert(builtin.name().to_string(), Value::Native(builtin));
    }
    globals.insert("NaN".to_string(), Value::Number(f64::NAN));
    globals.insert("Infinity".to_string(), Value::Number(f64::INFINITY));
    globals
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

pub fn call_builtin(
    sandbox: &mut Sandbox<'_>,
    builtin: Builtin,
    args: Vec<Value>,
) -> Result<Value, EvalError> {
    let number = |i: usize| arg(&args, i).to_number();

    let result = match builtin {
        Builtin::MathAbs => Value::Number(number(0).abs()),
        Builtin::MathCeil => Value::Number(number(0).ceil()),
        Builtin::MathFloor => Value::Number(number(0).floor()),
        // JS rounds halves towards +Infinity.
        Builtin::MathRound => Value::Number((number(0) + 0.5).floor()),
        Builtin::MathMax => Value::Number(extremum(&args, f64::NEG_INFINITY, f64::max)),
        Builtin::MathMin => Value::Number(extremum(&args, f64::INFINITY, f64::min)),
        Builtin::MathPow => Value::Number(number(0).powf(number(1))),
        Builtin::MathSqrt => Value::Number(number(0).sqrt()),
        Builtin::JsonStringify => json_stringify(&arg(&args, 0), &arg(&args, 2)),
        Builtin::JsonParse => {
            let text = arg(&args, 0).to_js_string();
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| EvalError::Thrown(format!("SyntaxError: {}", e)))?;
            Value::from(json)
        }
        Builtin::ObjectKeys => Value::Array(
            object_entries(&arg(&args, 0))?
                .into_iter()
                .map(|(k, _)| Value::String(k))
                .collect(),
        ),
        Builtin::ObjectValues => Value::Array(
            object_entries(&arg(&args, 0))?
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
        ),
        Builtin::ObjectEntries => Value::Array(
            object_entries(&arg(&args, 0))?
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                .collect(),
        ),
        Builtin::StringCtor => {
            if args.is_empty() {
                Value::str("")
            } else {
                Value::String(arg(&args, 0).to_js_string())
            }
        }
        Builtin::NumberCtor => {
            if args.is_empty() {
                Value::Number(0.0)
            } else {
                Value::Number(number(0))
            }
        }
        Builtin::BooleanCtor => Value::Bool(arg(&args, 0).truthy()),
        Builtin::ArrayIsArray => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
        Builtin::ParseInt => parse_int(&arg(&args, 0).to_js_string(), &arg(&args, 1)),
        Builtin::ParseFloat => parse_float(&arg(&args, 0).to_js_string()),
        Builtin::IsNaN => Value::Bool(number(0).is_nan()),
        Builtin::ShowAlert => {
            let style = arg(&args, 1);
            sandbox.record_effect(Effect::ShowAlert {
                message: arg(&args, 0).to_js_string(),
                style: if style.is_undefined() {
                    "info".to_string()
                } else {
                    style.to_js_string()
                },
            });
            Value::Undefined
        }
        Builtin::StoreValue => {
            sandbox.record_effect(Effect::StoreValue {
                key: arg(&args, 0).to_js_string(),
                value: arg(&args, 1),
            });
            Value::Undefined
        }
        Builtin::NavigateTo => {
            sandbox.record_effect(Effect::NavigateTo {
                target: arg(&args, 0).to_js_string(),
                params: arg(&args, 1),
            });
            Value::Undefined
        }
    };
    Ok(result)
}

/// `Math.max`/`Math.min`: any NaN argument poisons the result.
fn extremum(args: &[Value], start: f64, pick: fn(f64, f64) -> f64) -> f64 {
    args.iter().map(Value::to_number).fold(start, |acc, n| {
        if acc.is_nan() || n.is_nan() {
            f64::NAN
        } else {
            pick(acc, n)
        }
    })
}

fn json_stringify(value: &Value, indent: &Value) -> Value {
    let indent = indent.to_number();
    if indent.is_nan() || indent < 1.0 {
        return value.to_json_string().map(Value::String).unwrap_or_default();
    }
    if matches!(value, Value::Undefined | Value::Function(_) | Value::Native(_)) {
        return Value::Undefined;
    }
    let spaces = " ".repeat(indent.min(10.0) as usize);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(spaces.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    match serde::Serialize::serialize(&value.to_json(), &mut serializer) {
        Ok(()) => Value::String(String::from_utf8_lossy(&out).into_owned()),
        Err(_) => Value::Undefined,
    }
}

fn object_entries(value: &Value) -> Result<Vec<(String, Value)>, EvalError> {
    match value {
        Value::Undefined | Value::Null => Err(EvalError::Type(
            "Cannot convert undefined or null to object".to_string(),
        )),
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect()),
        Value::String(s) => Ok(s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::String(c.to_string())))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

fn parse_int(text: &str, radix: &Value) -> Value {
    let radix = if radix.is_undefined() {
        10
    } else {
        radix.to_number() as u32
    };
    if !(2..=36).contains(&radix) {
        return Value::Number(f64::NAN);
    }
    let Some(m) = INT_PREFIX.find(text.trim_start()) else {
        return Value::Number(f64::NAN);
    };
    let (sign, digits) = match m.as_str().strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, m.as_str().trim_start_matches('+')),
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return Value::Number(f64::NAN);
    }
    let value = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    Value::Number(sign * value)
}

fn parse_float(text: &str) -> Value {
    match FLOAT_PREFIX.find(text.trim_start()) {
        Some(m) => {
            let s = m.as_str();
            let n = match s.trim_start_matches('+') {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse::<f64>().unwrap_or(f64::NAN),
            };
            Value::Number(n)
        }
        None => Value::Number(f64::NAN),
    }
}

fn relative_index(index: &Value, len: usize, default: usize) -> usize {
    if index.is_undefined() {
        return default;
    }
    let n = index.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

/// Calls a built-in method on a string, array or number receiver.
///
/// `None` means the receiver has no such method.
pub fn call_method(
    sandbox: &mut Sandbox<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Option<Result<Value, EvalError>> {
    match receiver {
        Value::String(s) => string_method(s, name, &args).map(Ok),
        Value::Array(items) => array_method(sandbox, items, name, args),
        Value::Number(n) => number_method(*n, name, &args).map(Ok),
        _ => None,
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Value> {
    let text = |i: usize| arg(args, i).to_js_string();
    let char_index = |byte: usize| s[..byte].chars().count();

    let value = match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "toString" => Value::str(s),
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "indexOf" => Value::Number(
            s.find(&text(0))
                .map(|b| char_index(b) as f64)
                .unwrap_or(-1.0),
        ),
        "split" => {
            let sep = arg(args, 0);
            if sep.is_undefined() {
                Value::Array(vec![Value::str(s)])
            } else {
                let sep = sep.to_js_string();
                if sep.is_empty() {
                    Value::Array(s.chars().map(|c| Value::String(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(Value::str).collect())
                }
            }
        }
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(&arg(args, 0), chars.len(), 0);
            let end = relative_index(&arg(args, 1), chars.len(), chars.len());
            if start >= end {
                Value::str("")
            } else {
                Value::String(chars[start..end].iter().collect())
            }
        }
        "replace" => Value::String(s.replacen(&text(0), &text(1), 1)),
        "charAt" => {
            let i = arg(args, 0).to_number();
            let i = if i.is_nan() { 0 } else { i as usize };
            Value::String(s.chars().nth(i).map(String::from).unwrap_or_default())
        }
        _ => return None,
    };
    Some(value)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Value::String(format!("{:.*}", digits, n))
        }
        "toString" => Value::String(format_number(n)),
        _ => return None,
    };
    Some(value)
}

fn array_method(
    sandbox: &mut Sandbox<'_>,
    items: &[Value],
    name: &str,
    args: Vec<Value>,
) -> Option<Result<Value, EvalError>> {
    let callback = arg(&args, 0);
    let mut each = |f: &mut dyn FnMut(usize, &Value, Value) -> Option<Value>| -> Result<Option<Value>, EvalError> {
        for (i, item) in items.iter().enumerate() {
            let result = sandbox.call_value(
                &callback,
                Value::Undefined,
                vec![item.clone(), Value::Number(i as f64)],
            )?;
            if let Some(done) = f(i, item, result) {
                return Ok(Some(done));
            }
        }
        Ok(None)
    };

    let result = match name {
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            let done = each(&mut |_, _, r| {
                out.push(r);
                None
            });
            done.map(|_| Value::Array(out))
        }
        "filter" => {
            let mut out = Vec::new();
            let done = each(&mut |_, item, r| {
                if r.truthy() {
                    out.push(item.clone());
                }
                None
            });
            done.map(|_| Value::Array(out))
        }
        "forEach" => each(&mut |_, _, _| None).map(|_| Value::Undefined),
        "find" => each(&mut |_, item, r| r.truthy().then(|| item.clone()))
            .map(Option::unwrap_or_default),
        "some" => each(&mut |_, _, r| r.truthy().then_some(Value::Bool(true)))
            .map(|found| found.unwrap_or(Value::Bool(false))),
        "every" => each(&mut |_, _, r| (!r.truthy()).then_some(Value::Bool(false)))
            .map(|found| found.unwrap_or(Value::Bool(true))),
        "reduce" => {
            let (mut acc, start) = if args.len() > 1 {
                (arg(&args, 1), 0)
            } else if let Some(first) = items.first() {
                (first.clone(), 1)
            } else {
                return Some(Err(EvalError::Type(
                    "Reduce of empty array with no initial value".to_string(),
                )));
            };
            for (i, item) in items.iter().enumerate().skip(start) {
                match sandbox.call_value(
                    &callback,
                    Value::Undefined,
                    vec![acc, item.clone(), Value::Number(i as f64)],
                ) {
                    Ok(next) => acc = next,
                    Err(e) => return Some(Err(e)),
                }
            }
            Ok(acc)
        }
        "join" => {
            let sep = arg(&args, 0);
            let sep = if sep.is_undefined() {
                ",".to_string()
            } else {
                sep.to_js_string()
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        "includes" => Ok(Value::Bool(items.iter().any(|v| v.strict_equals(&callback)))),
        "indexOf" => Ok(Value::Number(
            items
                .iter()
                .position(|v| v.strict_equals(&callback))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        )),
        "slice" => {
            let start = relative_index(&arg(&args, 0), items.len(), 0);
            let end = relative_index(&arg(&args, 1), items.len(), items.len());
            Ok(Value::Array(if start >= end {
                Vec::new()
            } else {
                items[start..end].to_vec()
            }))
        }
        "concat" => {
            let mut out = items.to_vec();
            for extra in args {
                match extra {
                    Value::Array(more) => out.extend(more),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        "toString" => Ok(Value::String(Value::Array(items.to_vec()).to_js_string())),
        _ => return None,
    };
    Some(result)
}
