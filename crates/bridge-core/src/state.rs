//! Shared state projection and its reducer
//!
//! The agent owns the authoritative state. The bridge and the client each keep
//! a [`SharedState`] projection that is only ever changed by applying
//! snapshots and patches in relay order. Applying a patch is a pure function of
//! the previous value and the patch, so the bridge and the client converge on
//! the same value for the same event sequence.
//!
//! Two patch formats are accepted:
//! - a JSON object, applied as an RFC 7396 merge patch
//! - a JSON array of RFC 6902 operations (what AG-UI agents emit)

use crate::{Error, Result, StreamEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub schema_version: u32,
    /// Number of snapshots and deltas applied so far
    pub revision: u64,
    pub value: Value,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

/// A state update carried by a `StateDelta` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatePatch {
    Operations(Vec<PatchOperation>),
    Merge(Value),
}

/// One RFC 6902 JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl SharedState {
    pub fn new(initial: Value) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            revision: 0,
            value: initial,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Read a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Decode the state into a typed view
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    /// Full replacement
    pub fn apply_snapshot(&mut self, snapshot: Value) {
        self.value = snapshot;
        self.revision += 1;
    }

    /// Apply a patch atomically: on failure the state is left untouched.
    pub fn apply_delta(&mut self, patch: &StatePatch) -> Result<()> {
        self.value = reduce(&self.value, patch)?;
        self.revision += 1;
        Ok(())
    }

    /// Apply a stream event if it is state-affecting.
    ///
    /// Returns `Ok(true)` when the state changed.
    pub fn apply_event(&mut self, event: &StreamEvent) -> Result<bool> {
        match event {
            StreamEvent::StateSnapshot { snapshot } => {
                self.apply_snapshot(snapshot.clone());
                Ok(true)
            }
            StreamEvent::StateDelta { delta } => {
                self.apply_delta(delta)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Pure reducer: returns the value obtained by applying `patch` to `current`.
pub fn reduce(current: &Value, patch: &StatePatch) -> Result<Value> {
    let mut next = current.clone();
    match patch {
        StatePatch::Merge(merge) => merge_patch(&mut next, merge),
        StatePatch::Operations(ops) => {
            for op in ops {
                apply_operation(&mut next, op)?;
            }
        }
    }
    Ok(next)
}

/// RFC 7396 merge patch
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn apply_operation(doc: &mut Value, op: &PatchOperation) -> Result<()> {
    match op {
        PatchOperation::Add { path, value } => add(doc, &parse_pointer(path)?, value.clone()),
        PatchOperation::Remove { path } => remove(doc, &parse_pointer(path)?).map(|_| ()),
        PatchOperation::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            let target = lookup_mut(doc, &tokens)
                .ok_or_else(|| patch_error(format!("replace target '{}' does not exist", path)))?;
            *target = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            if path.starts_with(&format!("{}/", from)) {
                return Err(patch_error(format!(
                    "cannot move '{}' into its own child '{}'",
                    from, path
                )));
            }
            let value = remove(doc, &parse_pointer(from)?)?;
            add(doc, &parse_pointer(path)?, value)
        }
        PatchOperation::Copy { from, path } => {
            let value = lookup(doc, &parse_pointer(from)?)
                .cloned()
                .ok_or_else(|| patch_error(format!("copy source '{}' does not exist", from)))?;
            add(doc, &parse_pointer(path)?, value)
        }
        PatchOperation::Test { path, value } => match lookup(doc, &parse_pointer(path)?) {
            Some(actual) if actual == value => Ok(()),
            _ => Err(patch_error(format!("test failed at '{}'", path))),
        },
    }
}

fn patch_error(msg: String) -> Error {
    Error::stream_error(format!("invalid state patch: {}", msg))
}

/// Split an RFC 6901 pointer into unescaped reference tokens
fn parse_pointer(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(patch_error(format!("pointer '{}' must start with '/'", pointer)));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Array index token: "0" or digits without a leading zero
fn parse_index(token: &str) -> Option<usize> {
    let digits = !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit());
    if !digits || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    token.parse().ok()
}

fn array_index(token: &str, len: usize, allow_end: bool) -> Result<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let idx = parse_index(token)
        .ok_or_else(|| patch_error(format!("'{}' is not an array index", token)))?;
    let max = if allow_end { len } else { len.saturating_sub(1) };
    if idx > max || (!allow_end && len == 0) {
        return Err(patch_error(format!("array index {} out of bounds", idx)));
    }
    Ok(idx)
}

fn lookup<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(doc, |node, token| match node {
        Value::Object(map) => map.get(token),
        Value::Array(items) => parse_index(token).and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    tokens.iter().try_fold(doc, |node, token| match node {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

fn add(doc: &mut Value, tokens: &[String], value: Value) -> Result<()> {
    let Some((last, parent_tokens)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = lookup_mut(doc, parent_tokens)
        .ok_or_else(|| patch_error(format!("parent of '/{}' does not exist", tokens.join("/"))))?;
    match parent {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = array_index(last, items.len(), true)?;
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(patch_error(format!("cannot add '{}' to a scalar", last))),
    }
}

fn remove(doc: &mut Value, tokens: &[String]) -> Result<Value> {
    let Some((last, parent_tokens)) = tokens.split_last() else {
        return Err(patch_error("cannot remove the document root".to_string()));
    };
    let parent = lookup_mut(doc, parent_tokens)
        .ok_or_else(|| patch_error(format!("parent of '/{}' does not exist", tokens.join("/"))))?;
    match parent {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| patch_error(format!("remove target '{}' does not exist", last))),
        Value::Array(items) => {
            let idx = array_index(last, items.len(), false)?;
            Ok(items.remove(idx))
        }
        _ => Err(patch_error(format!("cannot remove '{}' from a scalar", last))),
    }
}
