//! Change record composition
//!
//! A [`ChangeMap`] describes what one mutation did to one object. Fields are
//! diffed on their public JSON projection:
//!
//! - objects with the same `id` (or no `id` at all) become nested field lists
//! - objects whose `id` changed are replaced as a whole
//! - sequences of identified objects are matched by `id`; new elements are
//!   `pushed`, vanished ones `pulled`, changed ones `updated` at their index
//! - sequences of plain values diff as sets
//!
//! Absent values are `null`; a present but empty value keeps its shape.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::Actor;
use crate::events::model::{ObjectKind, UserPartialModel};
use crate::types::{MutationError, Result};

/// Keys stripped from every value before diffing
const REDACTED_KEYS: &[&str] = &["emotes"];

static NULL: Value = Value::Null;

/// Structured change record for one object
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChangeMap {
    pub id: String,
    pub kind: ObjectKind,
    pub actor: UserPartialModel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<ChangeField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<ChangeField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<ChangeField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pushed: Vec<ChangeField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pulled: Vec<ChangeField>,
}

/// One field-level difference
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChangeField {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default)]
    pub nested: bool,
    #[serde(rename = "type")]
    pub value_type: String,
    pub old_value: Value,
    pub value: ChangeValue,
}

/// New value of a field: a plain value, or the child diffs of a nested field
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChangeValue {
    Fields(Vec<ChangeField>),
    Value(Value),
}

impl ChangeField {
    fn leaf(key: &str, index: Option<usize>, old: Value, new: Value) -> Self {
        let value_type = if new.is_null() {
            type_name(&old)
        } else {
            type_name(&new)
        };
        Self {
            key: key.to_string(),
            index,
            nested: false,
            value_type: value_type.to_string(),
            old_value: old,
            value: ChangeValue::Value(new),
        }
    }

    fn nested(key: &str, index: Option<usize>, children: Vec<ChangeField>) -> Self {
        Self {
            key: key.to_string(),
            index,
            nested: true,
            value_type: "object".to_string(),
            old_value: Value::Null,
            value: ChangeValue::Fields(children),
        }
    }

    /// Child diffs when this field is nested
    pub fn fields(&self) -> &[ChangeField] {
        match &self.value {
            ChangeValue::Fields(fields) => fields,
            ChangeValue::Value(_) => &[],
        }
    }

    /// Find a child diff by key
    pub fn field(&self, key: &str) -> Option<&ChangeField> {
        self.fields().iter().find(|f| f.key == key)
    }

    /// New value when this field is a leaf
    pub fn new_value(&self) -> Option<&Value> {
        match &self.value {
            ChangeValue::Value(v) => Some(v),
            ChangeValue::Fields(_) => None,
        }
    }
}

impl ChangeMap {
    pub fn new(id: ObjectId, kind: ObjectKind, actor: &Actor) -> Self {
        Self {
            id: id.to_hex(),
            kind,
            actor: UserPartialModel::from(actor),
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            pushed: Vec::new(),
            pulled: Vec::new(),
        }
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.pushed.is_empty()
            && self.pulled.is_empty()
    }

    /// Diff two whole projections of the object
    pub fn compose<T: Serialize>(mut self, before: &T, after: &T) -> Result<Self> {
        let before = project(before)?;
        let after = project(after)?;
        match (before, after) {
            (Value::Object(before), Value::Object(after)) => {
                self.diff_top_level(&before, &after);
                Ok(self)
            }
            _ => Err(MutationError::Internal(
                "change composition requires object projections".into(),
            )),
        }
    }

    /// Diff one element of the sequence `key`, recording it at `index`
    pub fn compose_at<T: Serialize>(
        mut self,
        key: &str,
        index: usize,
        before: &T,
        after: &T,
    ) -> Result<Self> {
        let before = project(before)?;
        let after = project(after)?;
        if before != after {
            self.updated.push(field_diff(key, Some(index), &before, &after));
        }
        Ok(self)
    }

    /// Record `value` as appended to `key` at `index`
    pub fn push_value<T: Serialize>(mut self, key: &str, index: usize, value: &T) -> Result<Self> {
        let value = project(value)?;
        self.pushed
            .push(ChangeField::leaf(key, Some(index), Value::Null, value));
        Ok(self)
    }

    /// Record `value` as removed from `key` at its prior `index`
    pub fn pull_value<T: Serialize>(mut self, key: &str, index: usize, value: &T) -> Result<Self> {
        let value = project(value)?;
        self.pulled
            .push(ChangeField::leaf(key, Some(index), value, Value::Null));
        Ok(self)
    }

    fn diff_top_level(&mut self, before: &Map<String, Value>, after: &Map<String, Value>) {
        for key in union_keys(before, after) {
            match (before.get(key), after.get(key)) {
                (None, Some(new)) => self
                    .added
                    .push(ChangeField::leaf(key, None, Value::Null, new.clone())),
                (Some(old), None) => self
                    .removed
                    .push(ChangeField::leaf(key, None, old.clone(), Value::Null)),
                (Some(old), Some(new)) if old != new => match (old, new) {
                    (Value::Array(old), Value::Array(new)) => self.diff_sequence(key, old, new),
                    _ => self.updated.push(field_diff(key, None, old, new)),
                },
                _ => {}
            }
        }
    }

    fn diff_sequence(&mut self, key: &str, old: &[Value], new: &[Value]) {
        let identified = old.iter().chain(new.iter()).all(|v| object_id(v).is_some());

        if identified {
            for (i, before) in old.iter().enumerate() {
                let id = object_id(before);
                match new.iter().enumerate().find(|(_, v)| object_id(v) == id) {
                    Some((j, after)) if after != before => {
                        self.updated.push(field_diff(key, Some(j), before, after))
                    }
                    Some(_) => {}
                    None => self
                        .pulled
                        .push(ChangeField::leaf(key, Some(i), before.clone(), Value::Null)),
                }
            }
            for (j, after) in new.iter().enumerate() {
                let id = object_id(after);
                if !old.iter().any(|v| object_id(v) == id) {
                    self.pushed
                        .push(ChangeField::leaf(key, Some(j), Value::Null, after.clone()));
                }
            }
            return;
        }

        for (i, before) in old.iter().enumerate() {
            if !new.contains(before) {
                self.pulled
                    .push(ChangeField::leaf(key, Some(i), before.clone(), Value::Null));
            }
        }
        for (j, after) in new.iter().enumerate() {
            if !old.contains(after) {
                self.pushed
                    .push(ChangeField::leaf(key, Some(j), Value::Null, after.clone()));
            }
        }
    }
}

/// Diff of two present values under one key
fn field_diff(key: &str, index: Option<usize>, old: &Value, new: &Value) -> ChangeField {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) if object_id(old) == object_id(new) => {
            let children = union_keys(a, b)
                .into_iter()
                .filter_map(|k| {
                    let before = a.get(k).unwrap_or(&NULL);
                    let after = b.get(k).unwrap_or(&NULL);
                    (before != after).then(|| field_diff(k, None, before, after))
                })
                .collect();
            ChangeField::nested(key, index, children)
        }
        _ => ChangeField::leaf(key, index, old.clone(), new.clone()),
    }
}

fn project<T: Serialize>(value: &T) -> Result<Value> {
    let mut value = serde_json::to_value(value)
        .map_err(|e| MutationError::Internal(format!("failed to project value: {}", e)))?;
    redact(&mut value);
    Ok(value)
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in REDACTED_KEYS {
                map.remove(*key);
            }
            map.values_mut().for_each(redact);
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

fn object_id(value: &Value) -> Option<&Value> {
    value.as_object().and_then(|o| o.get("id"))
}

fn union_keys<'a>(a: &'a Map<String, Value>, b: &'a Map<String, Value>) -> Vec<&'a String> {
    let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
    keys.sort();
    keys.dedup();
    keys
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RolePermission;
    use crate::db::schemas::{
        ActiveEmote, ConnectionPlatform, EmoteSetDoc, UserConnection, UserDoc,
    };
    use crate::events::model::{UserConnectionModel, UserModel};
    use serde_json::json;

    fn actor() -> Actor {
        Actor::with_permissions(&UserDoc::new("actor"), RolePermission::NONE)
    }

    fn set_with_emotes(name: &str, owner: ObjectId) -> EmoteSetDoc {
        let mut set = EmoteSetDoc::new(name, owner);
        set.emotes.push(ActiveEmote {
            id: ObjectId::new(),
            name: "Kappa".into(),
            actor_id: None,
            timestamp: None,
        });
        set
    }

    #[test]
    fn test_set_change_is_nested_and_redacted() {
        let user = UserDoc::new("alice");
        let set_a = set_with_emotes("a", user.id);
        let set_b = set_with_emotes("b", user.id);

        let mut conn = UserConnection::new("tw", ConnectionPlatform::Twitch);
        conn.emote_set_id = Some(set_a.id);
        let before = UserConnectionModel::from(&conn).with_emote_set(Some(&set_a));
        conn.emote_set_id = Some(set_b.id);
        let after = UserConnectionModel::from(&conn).with_emote_set(Some(&set_b));

        let change = ChangeMap::new(user.id, ObjectKind::User, &actor())
            .compose_at("connections", 0, &before, &after)
            .unwrap();

        assert_eq!(change.updated.len(), 1);
        let conn_field = &change.updated[0];
        assert_eq!(conn_field.key, "connections");
        assert_eq!(conn_field.index, Some(0));
        assert!(conn_field.nested);

        let set_field = conn_field.field("emote_set").unwrap();
        assert!(!set_field.nested);
        assert_eq!(set_field.old_value["id"], json!(set_a.id.to_hex()));
        assert_eq!(set_field.new_value().unwrap()["id"], json!(set_b.id.to_hex()));
        assert!(set_field.old_value.get("emotes").is_none());
        assert!(set_field.new_value().unwrap().get("emotes").is_none());

        let id_field = conn_field.field("emote_set_id").unwrap();
        assert_eq!(id_field.old_value, json!(set_a.id.to_hex()));
        assert_eq!(id_field.new_value(), Some(&json!(set_b.id.to_hex())));
    }

    #[test]
    fn test_unchanged_yields_no_entries() {
        let mut user = UserDoc::new("alice");
        user.connections
            .push(UserConnection::new("tw", ConnectionPlatform::Twitch));
        let model = UserModel::from(&user);

        let change = ChangeMap::new(user.id, ObjectKind::User, &actor())
            .compose(&model, &model)
            .unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn test_unset_is_distinguished_from_cleared() {
        let before = json!({ "id": "x", "display_name": "Alice", "bio": null });
        let after = json!({ "id": "x", "display_name": "", "bio": "hi" });

        let change = ChangeMap::new(ObjectId::new(), ObjectKind::User, &actor())
            .compose(&before, &after)
            .unwrap();

        let bio = change.updated.iter().find(|f| f.key == "bio").unwrap();
        assert_eq!(bio.old_value, Value::Null);
        let name = change
            .updated
            .iter()
            .find(|f| f.key == "display_name")
            .unwrap();
        assert_eq!(name.new_value(), Some(&json!("")));
    }

    #[test]
    fn test_sequences_diff_into_pushed_and_pulled() {
        let mut before = UserDoc::new("alice");
        before
            .connections
            .push(UserConnection::new("a", ConnectionPlatform::Twitch));
        before
            .connections
            .push(UserConnection::new("b", ConnectionPlatform::Discord));
        let kept_role = ObjectId::new();
        let dropped_role = ObjectId::new();
        before.role_ids = vec![kept_role, dropped_role];

        let mut after = before.clone();
        after.connections.remove(0);
        let new_role = ObjectId::new();
        after.role_ids = vec![kept_role, new_role];

        let change = ChangeMap::new(before.id, ObjectKind::User, &actor())
            .compose(&UserModel::from(&before), &UserModel::from(&after))
            .unwrap();

        let pulled_conn = change
            .pulled
            .iter()
            .find(|f| f.key == "connections")
            .unwrap();
        assert_eq!(pulled_conn.index, Some(0));
        assert_eq!(pulled_conn.old_value["id"], json!("a"));

        let pulled_role = change.pulled.iter().find(|f| f.key == "role_ids").unwrap();
        assert_eq!(pulled_role.old_value, json!(dropped_role.to_hex()));
        let pushed_role = change.pushed.iter().find(|f| f.key == "role_ids").unwrap();
        assert_eq!(pushed_role.index, Some(1));
        assert_eq!(pushed_role.new_value(), Some(&json!(new_role.to_hex())));
        assert!(change.updated.is_empty());
    }

    #[test]
    fn test_pull_value_without_persisted_state() {
        let conn = UserConnection::new("dc", ConnectionPlatform::Discord);
        let change = ChangeMap::new(ObjectId::new(), ObjectKind::User, &actor())
            .pull_value("connections", 2, &UserConnectionModel::from(&conn))
            .unwrap();

        assert_eq!(change.pulled[0].index, Some(2));
        assert_eq!(change.pulled[0].old_value["platform"], json!("DISCORD"));
        assert_eq!(change.pulled[0].new_value(), Some(&Value::Null));
    }
}
