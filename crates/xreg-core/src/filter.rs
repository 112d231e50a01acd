//! Filter expressions: which entities of a response survive
//!
//! Each `filter=` parameter is an AND-list of comma separated expressions;
//! repeated parameters are OR'd. An expression is `[scope.]field`,
//! `[scope.]field=value` or `[scope.]field==value`, where the scope is a run
//! of nested collection names below the request target.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::entity::EntityUid;
use crate::limits::validate_filter_count;
use crate::model::{Level, Model};
use crate::path::{Path, PathError, PathPart};

const WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("{0}")]
    Path(#[from] PathError),

    #[error("Empty filter expression in \"{0}\"")]
    Empty(String),

    #[error("Expression \"{0}\" is not on the same branch as the rest of its filter")]
    ScopeMismatch(String),

    #[error("{0}")]
    Limit(String),
}

/// What an expression compares against
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// `field`: the attribute is present
    Present,
    /// `field=null`: the attribute is absent
    Absent,
    /// `field=value` (loose) or `field==value` (exact)
    Equals { value: String, exact: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    /// Nested collections between the request target and the entity tested
    pub scope: Vec<String>,
    pub field: Path,
    pub comparison: Comparison,
    text: String,
}

/// OR of AND-lists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    any_of: Vec<Vec<FilterExpr>>,
}

/// An entity the filter can test
#[derive(Debug, Clone)]
pub struct Candidate {
    pub uid: EntityUid,
    /// Collection names from the request target down to this entity
    pub scope: Vec<String>,
    pub parent: Option<usize>,
    pub attributes: Value,
}

/// Result of running a filter over a candidate list
#[derive(Debug, Clone, Default)]
pub struct Selection {
    kept: Option<HashSet<EntityUid>>,
}

impl Selection {
    /// Keep everything
    pub fn all() -> Self {
        Self { kept: None }
    }

    pub fn is_kept(&self, uid: &EntityUid) -> bool {
        self.kept.as_ref().map_or(true, |k| k.contains(uid))
    }

    pub fn is_filtered(&self) -> bool {
        self.kept.is_some()
    }
}

impl FilterExpr {
    fn parse(text: &str, model: &Model, level: Level<'_>) -> Result<Self, FilterError> {
        let (lhs, comparison) = match text.find('=') {
            None => (text, Comparison::Present),
            Some(pos) => {
                let rest = &text[pos + 1..];
                let (value, exact) = match rest.strip_prefix('=') {
                    Some(v) => (v, true),
                    None => (rest, false),
                };
                let comparison = if value == "null" {
                    Comparison::Absent
                } else {
                    Comparison::Equals {
                        value: value.to_string(),
                        exact,
                    }
                };
                (&text[..pos], comparison)
            }
        };

        let lhs = lhs.trim();
        if lhs.is_empty() {
            return Err(FilterError::Empty(text.to_string()));
        }
        let path = Path::parse(lhs)?;

        let mut scope = Vec::new();
        let mut current = level;
        for part in path.parts() {
            let Some(name) = part.key() else { break };
            match current.child(model, name) {
                Some(next) => {
                    scope.push(name.to_string());
                    current = next;
                }
                None => break,
            }
        }
        let field = Path::from_parts(path.parts()[scope.len()..].to_vec());

        Ok(Self {
            scope,
            field,
            comparison,
            text: text.to_string(),
        })
    }

    fn depth(&self) -> usize {
        self.scope.len()
    }

    /// Test the attributes of the entity at this expression's scope
    pub fn matches(&self, attributes: &Value) -> bool {
        if self.field.is_empty() {
            return true;
        }
        let mut found = Vec::new();
        collect(attributes, self.field.parts(), &mut found);
        match &self.comparison {
            Comparison::Present => !found.is_empty(),
            Comparison::Absent => found.is_empty(),
            Comparison::Equals { value, exact } => {
                found.iter().any(|v| compare(v, value, *exact))
            }
        }
    }
}

fn collect<'a>(value: &'a Value, parts: &[PathPart], out: &mut Vec<&'a Value>) {
    let Some((part, rest)) = parts.split_first() else {
        if !value.is_null() {
            out.push(value);
        }
        return;
    };
    match (part, value) {
        (PathPart::Key(k), Value::Object(map)) if k == WILDCARD => {
            map.values().for_each(|v| collect(v, rest, out))
        }
        (PathPart::Key(k), Value::Array(items)) if k == WILDCARD => {
            items.iter().for_each(|v| collect(v, rest, out))
        }
        (PathPart::Key(k), Value::Object(map)) => {
            if let Some(v) = map.get(k) {
                collect(v, rest, out);
            }
        }
        (PathPart::Key(k), Value::Array(items)) => {
            if let Some(v) = k.parse::<usize>().ok().and_then(|i| items.get(i)) {
                collect(v, rest, out);
            }
        }
        (PathPart::Index(i), Value::Array(items)) => {
            if let Some(v) = items.get(*i) {
                collect(v, rest, out);
            }
        }
        _ => {}
    }
}

fn compare(actual: &Value, expected: &str, exact: bool) -> bool {
    match actual {
        Value::String(s) if exact => s == expected,
        Value::String(s) => s.to_lowercase().contains(&expected.to_lowercase()),
        Value::Bool(b) => expected
            .parse::<bool>()
            .map_or(false, |e| e == *b),
        Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(e)) => a == e,
            _ => n.to_string() == expected,
        },
        _ => false,
    }
}

impl Filter {
    /// Parse the values of every `filter=` parameter against the level of
    /// the request target
    pub fn parse<S: AsRef<str>>(
        params: &[S],
        model: &Model,
        level: Level<'_>,
    ) -> Result<Self, FilterError> {
        let mut any_of = Vec::new();
        let mut count = 0;

        for param in params {
            let param = param.as_ref();
            if param.trim().is_empty() {
                continue;
            }
            let mut all_of = Vec::new();
            for text in param.split(',') {
                all_of.push(FilterExpr::parse(text, model, level)?);
            }
            count += all_of.len();
            validate_filter_count(count).map_err(|e| FilterError::Limit(e.to_string()))?;

            let leaf = all_of
                .iter()
                .max_by_key(|e| e.depth())
                .map(|e| e.scope.clone())
                .unwrap_or_default();
            if let Some(bad) = all_of.iter().find(|e| !leaf.starts_with(&e.scope)) {
                return Err(FilterError::ScopeMismatch(bad.text.clone()));
            }
            any_of.push(all_of);
        }

        Ok(Self { any_of })
    }

    pub fn is_empty(&self) -> bool {
        self.any_of.is_empty()
    }

    /// Decide which candidates are kept: every matching leaf plus its
    /// ancestors and descendants
    pub fn select(&self, candidates: &[Candidate]) -> Selection {
        if self.is_empty() {
            return Selection::all();
        }

        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, c) in candidates.iter().enumerate() {
            if let Some(p) = c.parent {
                children.entry(p).or_default().push(i);
            }
        }

        let mut kept = HashSet::new();
        for all_of in &self.any_of {
            let leaf_depth = all_of.iter().map(FilterExpr::depth).max().unwrap_or(0);
            let leaf_scope = &all_of
                .iter()
                .find(|e| e.depth() == leaf_depth)
                .map(|e| e.scope.clone())
                .unwrap_or_default();

            for (i, c) in candidates.iter().enumerate() {
                if &c.scope != leaf_scope {
                    continue;
                }
                let satisfied = all_of.iter().all(|expr| {
                    ancestor_at(candidates, i, leaf_depth - expr.depth())
                        .is_some_and(|a| expr.matches(&candidates[a].attributes))
                });
                if !satisfied {
                    continue;
                }

                let mut up = Some(i);
                while let Some(idx) = up {
                    kept.insert(candidates[idx].uid.clone());
                    up = candidates[idx].parent;
                }
                let mut stack = children.get(&i).cloned().unwrap_or_default();
                while let Some(idx) = stack.pop() {
                    kept.insert(candidates[idx].uid.clone());
                    if let Some(more) = children.get(&idx) {
                        stack.extend(more);
                    }
                }
            }
        }

        debug!("Filter kept {} of {} entities", kept.len(), candidates.len());
        Selection { kept: Some(kept) }
    }
}

fn ancestor_at(candidates: &[Candidate], start: usize, steps: usize) -> Option<usize> {
    let mut idx = start;
    for _ in 0..steps {
        idx = candidates[idx].parent?;
    }
    Some(idx)
}
