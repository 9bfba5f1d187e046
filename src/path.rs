//! Dotted property paths (`primaryColumns.name.computedValue`, `data[0].id`).
//!
//! Fully-qualified paths prefix the entity name: `Table1.data[0].id`.

use crate::value::{Object, Value};
use std::sync::Arc;

/// Longest array a path write may create.
pub const MAX_ARRAY_LENGTH: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

pub fn split_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                if let Ok(index) = inner.parse::<usize>() {
                    segments.push(Segment::Index(index));
                } else {
                    let unquoted = inner.trim_matches(|q| q == '"' || q == '\'');
                    segments.push(Segment::Key(unquoted.to_string()));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    segments
}

pub fn qualify(entity: &str, path: &str) -> String {
    if path.is_empty() {
        entity.to_string()
    } else if path.starts_with('[') {
        format!("{}{}", entity, path)
    } else {
        format!("{}.{}", entity, path)
    }
}

/// Splits `Entity.rest` into `("Entity", "rest")`; `rest` is empty for a bare name.
pub fn split_qualified(full: &str) -> (&str, &str) {
    match full.find(['.', '[']) {
        Some(pos) if full.as_bytes()[pos] == b'.' => (&full[..pos], &full[pos + 1..]),
        Some(pos) => (&full[..pos], &full[pos..]),
        None => (full, ""),
    }
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && matches!(path.as_bytes()[ancestor.len()], b'.' | b'[')
}

/// True when the two paths are equal or one lies below the other.
pub fn overlaps(a: &str, b: &str) -> bool {
    a == b || is_descendant(a, b) || is_descendant(b, a)
}

/// Proper ancestors of `path`, nearest last: `a.b[0].c` gives `a`, `a.b`, `a.b[0]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.char_indices()
        .filter(|(i, c)| *i > 0 && (*c == '.' || *c == '['))
        .map(|(i, _)| &path[..i])
        .collect()
}

pub fn get<'a>(root: &'a Object, path: &str) -> Option<&'a Value> {
    let segments = split_path(path);
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(&first.as_key())?;
    for segment in rest {
        current = match (current, segment) {
            (Value::Array(items), Segment::Index(i)) => items.get(*i)?,
            (other, seg) => other.properties()?.get(&seg.as_key())?,
        };
    }
    Some(current)
}

pub fn has(root: &Object, path: &str) -> bool {
    get(root, path).is_some()
}

/// True when no index in `path` reaches [`MAX_ARRAY_LENGTH`].
pub fn in_bounds(path: &str) -> bool {
    split_path(path)
        .iter()
        .all(|segment| !matches!(segment, Segment::Index(i) if *i >= MAX_ARRAY_LENGTH))
}

/// Writes `value` at `path`, creating intermediate objects (or arrays before an index).
///
/// Returns `false`, leaving `root` untouched, when the path is empty or an
/// index is out of bounds.
pub fn set(root: &mut Object, path: &str, value: Value) -> bool {
    if !in_bounds(path) {
        return false;
    }
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    if parents.is_empty() {
        root.insert(last.as_key(), value);
        return true;
    }

    let first_key = parents[0].as_key();
    let next_is_index = matches!(parents.get(1).unwrap_or(last), Segment::Index(_));
    let mut current = root
        .entry(first_key)
        .or_insert_with(|| empty_container(next_is_index));

    for (i, segment) in parents.iter().enumerate().skip(1) {
        let next_is_index = matches!(parents.get(i + 1).unwrap_or(last), Segment::Index(_));
        current = child_mut(current, segment, next_is_index);
    }
    assign(current, last, value);
    true
}

/// Removes the value at `path` and returns it.
pub fn unset(root: &mut Object, path: &str) -> Option<Value> {
    let segments = split_path(path);
    let (last, parents) = segments.split_last()?;
    if parents.is_empty() {
        return root.remove(&last.as_key());
    }

    let mut current = root.get_mut(&parents[0].as_key())?;
    for segment in &parents[1..] {
        current = match (current, segment) {
            (Value::Array(items), Segment::Index(i)) => items.get_mut(*i)?,
            (other, seg) => other.properties_mut()?.get_mut(&seg.as_key())?,
        };
    }
    match (current, last) {
        (Value::Array(items), Segment::Index(i)) if *i < items.len() => {
            Some(std::mem::take(&mut items[*i]))
        }
        (Value::Array(_), _) => None,
        (other, seg) => other.properties_mut()?.remove(&seg.as_key()),
    }
}

fn empty_container(index: bool) -> Value {
    if index {
        Value::Array(Vec::new())
    } else {
        Value::object()
    }
}

fn child_mut<'a>(current: &'a mut Value, segment: &Segment, next_is_index: bool) -> &'a mut Value {
    let keyed_array = matches!(current, Value::Array(_)) && matches!(segment, Segment::Key(_));
    if keyed_array || !matches!(current, Value::Object(_) | Value::Array(_) | Value::Function(_)) {
        *current = Value::object();
    }
    match (current, segment) {
        (Value::Array(items), Segment::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Undefined);
            }
            let slot = &mut items[*i];
            if !matches!(slot, Value::Object(_) | Value::Array(_)) {
                *slot = empty_container(next_is_index);
            }
            slot
        }
        (Value::Function(closure), seg) => Arc::make_mut(closure)
            .properties
            .entry(seg.as_key())
            .or_insert_with(|| empty_container(next_is_index)),
        (Value::Object(map), seg) => map
            .entry(seg.as_key())
            .or_insert_with(|| empty_container(next_is_index)),
        _ => unreachable!("non-containers are replaced by objects above"),
    }
}

fn assign(current: &mut Value, segment: &Segment, value: Value) {
    match (current, segment) {
        (Value::Array(items), Segment::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Undefined);
            }
            items[*i] = value;
        }
        (Value::Object(map), seg) => {
            map.insert(seg.as_key(), value);
        }
        (Value::Function(closure), seg) => {
            Arc::make_mut(closure).properties.insert(seg.as_key(), value);
        }
        (other, seg) => {
            let mut map = Object::new();
            map.insert(seg.as_key(), value);
            *other = Value::Object(map);
        }
    }
}
