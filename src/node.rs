use std::collections::BTreeSet;

/// A reactive path in the dependency graph together with what its expression references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub path: String,
    pub references: BTreeSet<String>,
}

impl Node {
    pub fn create(path: impl Into<String>) -> Self {
        Node {
            path: path.into(),
            references: BTreeSet::new(),
        }
    }
}

/// Paths whose expressions reference one tree path.
///
/// Most references have a handful of dependents, kept in a vector; past
/// that the container turns into an ordered set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Dependents {
    #[default]
    None,
    Vector(Vec<String>),
    Set(BTreeSet<String>),
}

const VECTOR_LIMIT: usize = 7;

impl Dependents {
    pub fn insert(&mut self, path: &str) {
        match self {
            Dependents::None => {
                *self = Dependents::Vector(vec![path.to_string()]);
            }
            Dependents::Vector(vec) => {
                if vec.iter().any(|p| p == path) {
                    return;
                }
                if vec.len() >= VECTOR_LIMIT {
                    let mut set: BTreeSet<String> = vec.drain(..).collect();
                    set.insert(path.to_string());
                    *self = Dependents::Set(set);
                } else {
                    vec.push(path.to_string());
                }
            }
            Dependents::Set(set) => {
                set.insert(path.to_string());
            }
        }
    }

    pub fn remove(&mut self, path: &str) {
        match self {
            Dependents::Vector(vec) => vec.retain(|p| p != path),
            Dependents::Set(set) => {
                set.remove(path);
            }
            Dependents::None => {}
        }
        if self.is_empty() {
            *self = Dependents::None;
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        match self {
            Dependents::Vector(vec) => vec.iter().any(|p| p == path),
            Dependents::Set(set) => set.contains(path),
            Dependents::None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Dependents::Vector(vec) => vec.is_empty(),
            Dependents::Set(set) => set.is_empty(),
            Dependents::None => true,
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &String> + '_> {
        match self {
            Dependents::Vector(vec) => Box::new(vec.iter()),
            Dependents::Set(set) => Box::new(set.iter()),
            Dependents::None => Box::new(std::iter::empty()),
        }
    }
}
