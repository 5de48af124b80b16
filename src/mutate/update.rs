//! Update descriptions and the document path engine
//!
//! An [`UpdateDescription`] accumulates field-path operations and renders them
//! as a MongoDB update document. The same description can be applied to an
//! in-memory [`Document`], which is how builders keep their staged entity in
//! sync and how `MemoryStore` emulates the store.
//!
//! Paths use dot notation; numeric segments index into arrays
//! (`connections.2.emote_set_id`).

use bson::{Bson, Document};
use std::collections::BTreeMap;

use crate::types::{MutationError, Result};

/// Accumulated field-path update for one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDescription {
    set: Document,
    unset: Vec<String>,
    pull: BTreeMap<String, Vec<Bson>>,
    add_to_set: BTreeMap<String, Vec<Bson>>,
    push: BTreeMap<String, Vec<Bson>>,
}

impl UpdateDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` to `value`
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        let path = path.into();
        self.unset.retain(|p| *p != path);
        self.set.insert(path, value.into());
    }

    /// Remove the field at `path`
    pub fn unset(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.set.remove(&path);
        if !self.unset.contains(&path) {
            self.unset.push(path);
        }
    }

    /// Remove array elements at `path` matching `matcher`. A document matcher
    /// matches elements whose fields equal every field of the matcher.
    pub fn pull(&mut self, path: impl Into<String>, matcher: impl Into<Bson>) {
        self.pull.entry(path.into()).or_default().push(matcher.into());
    }

    /// Append `value` to the array at `path` unless already present
    pub fn add_to_set(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        self.add_to_set
            .entry(path.into())
            .or_default()
            .push(value.into());
    }

    /// Append `value` to the array at `path`
    pub fn push(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        self.push.entry(path.into()).or_default().push(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.pull.is_empty()
            && self.add_to_set.is_empty()
            && self.push.is_empty()
    }

    /// Every path this description touches
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.set.keys().cloned().collect();
        paths.extend(self.unset.iter().cloned());
        paths.extend(self.pull.keys().cloned());
        paths.extend(self.add_to_set.keys().cloned());
        paths.extend(self.push.keys().cloned());
        paths
    }

    /// Render as a MongoDB update document
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();

        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }

        if !self.unset.is_empty() {
            let mut unset = Document::new();
            for path in &self.unset {
                unset.insert(path.clone(), "");
            }
            update.insert("$unset", unset);
        }

        if !self.pull.is_empty() {
            let mut pull = Document::new();
            for (path, matchers) in &self.pull {
                pull.insert(path.clone(), render_pull(matchers));
            }
            update.insert("$pull", pull);
        }

        if !self.add_to_set.is_empty() {
            update.insert("$addToSet", render_each(&self.add_to_set));
        }

        if !self.push.is_empty() {
            update.insert("$push", render_each(&self.push));
        }

        update
    }

    /// Apply this description to a document in place
    pub fn apply_to(&self, doc: &mut Document) -> Result<()> {
        let mut root = Bson::Document(std::mem::take(doc));
        let result = self.apply_to_root(&mut root);
        if let Bson::Document(d) = root {
            *doc = d;
        }
        result
    }

    fn apply_to_root(&self, root: &mut Bson) -> Result<()> {
        for (path, value) in &self.set {
            set_in(root, path, value.clone(), path)?;
        }

        for path in &self.unset {
            unset_in(root, path);
        }

        for (path, matchers) in &self.pull {
            if let Some(Bson::Array(items)) = node_mut(root, path) {
                items.retain(|item| !matchers.iter().any(|m| element_matches(item, m)));
            }
        }

        for (path, values) in &self.add_to_set {
            let items = array_at(root, path)?;
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
        }

        for (path, values) in &self.push {
            array_at(root, path)?.extend(values.iter().cloned());
        }

        Ok(())
    }
}

fn render_pull(matchers: &[Bson]) -> Bson {
    match matchers {
        [single] => single.clone(),
        many if many.iter().all(|m| matches!(m, Bson::Document(_))) => {
            let mut or = Document::new();
            or.insert("$or", many.to_vec());
            Bson::Document(or)
        }
        many => {
            let mut any = Document::new();
            any.insert("$in", many.to_vec());
            Bson::Document(any)
        }
    }
}

fn render_each(ops: &BTreeMap<String, Vec<Bson>>) -> Document {
    let mut rendered = Document::new();
    for (path, values) in ops {
        let value = match values.as_slice() {
            [single] => single.clone(),
            many => {
                let mut each = Document::new();
                each.insert("$each", many.to_vec());
                Bson::Document(each)
            }
        };
        rendered.insert(path.clone(), value);
    }
    rendered
}

/// Resolve a dotted path inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(d) => d.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether `doc` satisfies an equality filter. A missing field matches `null`.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(path, expected)| match get_path(doc, path) {
        Some(actual) => actual == expected,
        None => *expected == Bson::Null,
    })
}

fn element_matches(item: &Bson, matcher: &Bson) -> bool {
    match (item, matcher) {
        (Bson::Document(item), Bson::Document(matcher)) => matches_filter(item, matcher),
        _ => item == matcher,
    }
}

fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

fn set_in(node: &mut Bson, path: &str, value: Bson, full: &str) -> Result<()> {
    let (head, rest) = split_head(path);
    match node {
        Bson::Document(d) => match rest {
            None => {
                d.insert(head, value);
                Ok(())
            }
            Some(rest) => {
                if !d.contains_key(head) {
                    d.insert(head, Document::new());
                }
                match d.get_mut(head) {
                    Some(child) => set_in(child, rest, value, full),
                    None => Err(untraversable(full)),
                }
            }
        },
        Bson::Array(items) => {
            let idx = head.parse::<usize>().map_err(|_| untraversable(full))?;
            let slot = items.get_mut(idx).ok_or_else(|| untraversable(full))?;
            match rest {
                None => {
                    *slot = value;
                    Ok(())
                }
                Some(rest) => set_in(slot, rest, value, full),
            }
        }
        _ => Err(untraversable(full)),
    }
}

fn unset_in(node: &mut Bson, path: &str) {
    let (head, rest) = split_head(path);
    match rest {
        None => {
            if let Bson::Document(d) = node {
                d.remove(head);
            }
        }
        Some(rest) => {
            if let Some(child) = child_mut(node, head) {
                unset_in(child, rest);
            }
        }
    }
}

fn child_mut<'a>(node: &'a mut Bson, segment: &str) -> Option<&'a mut Bson> {
    match node {
        Bson::Document(d) => d.get_mut(segment),
        Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn node_mut<'a>(node: &'a mut Bson, path: &str) -> Option<&'a mut Bson> {
    let (head, rest) = split_head(path);
    let child = child_mut(node, head)?;
    match rest {
        None => Some(child),
        Some(rest) => node_mut(child, rest),
    }
}

fn array_at<'a>(root: &'a mut Bson, path: &str) -> Result<&'a mut Vec<Bson>> {
    if node_mut(root, path).is_none() {
        set_in(root, path, Bson::Array(Vec::new()), path)?;
    }
    match node_mut(root, path) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(MutationError::InvalidState(format!(
            "field `{}` is not an array",
            path
        ))),
    }
}

fn untraversable(path: &str) -> MutationError {
    MutationError::InvalidState(format!("cannot resolve field path `{}`", path))
}
