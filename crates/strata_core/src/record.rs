use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;

use crate::events::RecordEvent;
use crate::ir::{QueryIr, QueryKind, WhereClause};
use crate::relations::{load_for_parent, PivotOps, RelationDef};
use crate::{CastKind, Connection, ModelClass, Models, OrmError, OrmResult, Value};

/// A loaded relation attached to a record.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_deref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Record] {
        match self {
            Related::Many(records) => records,
            Related::One(_) => &[],
        }
    }
}

/// One in-memory row with attribute tracking.
///
/// `attributes` is the current state, `original` the snapshot from the
/// last load or save; the dirty set is derived from the difference, so
/// the bookkeeping cannot drift. Records are not thread-safe; share them
/// across threads only with external synchronization.
#[derive(Clone)]
pub struct Record {
    class: Arc<ModelClass>,
    models: Models,
    attributes: IndexMap<String, Value>,
    original: IndexMap<String, Value>,
    exists: bool,
    was_recently_created: bool,
    last_changes: IndexMap<String, Value>,
    relations: IndexMap<String, Related>,
    pivot: Option<IndexMap<String, Value>>,
}

impl Record {
    pub fn new(class: Arc<ModelClass>, models: Models) -> Self {
        Self {
            class,
            models,
            attributes: IndexMap::new(),
            original: IndexMap::new(),
            exists: false,
            was_recently_created: false,
            last_changes: IndexMap::new(),
            relations: IndexMap::new(),
            pivot: None,
        }
    }

    /// Build a record from one result row: attributes copied verbatim,
    /// `original := attributes`, `exists := true`.
    pub fn hydrate(
        class: Arc<ModelClass>,
        models: Models,
        columns: &[String],
        row: Vec<Value>,
    ) -> Self {
        let attributes: IndexMap<String, Value> =
            columns.iter().cloned().zip(row).collect();
        Self {
            original: attributes.clone(),
            attributes,
            class,
            models,
            exists: true,
            was_recently_created: false,
            last_changes: IndexMap::new(),
            relations: IndexMap::new(),
            pivot: None,
        }
    }

    /// Rebuild a record from a serialized object, bypassing the fill
    /// policy.
    pub fn from_object(
        class: Arc<ModelClass>,
        models: Models,
        object: &serde_json::Value,
    ) -> OrmResult<Self> {
        let map = object
            .as_object()
            .ok_or_else(|| OrmError::configuration("record JSON must be an object"))?;
        let mut record = Self::new(class, models);
        for (key, value) in map {
            record.force_set(key.clone(), Value::from_json(value));
        }
        Ok(record)
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    pub fn pivot(&self) -> Option<&IndexMap<String, Value>> {
        self.pivot.as_ref()
    }

    pub(crate) fn set_pivot(&mut self, pivot: IndexMap<String, Value>) {
        self.pivot = Some(pivot);
    }

    // ------------------------------------------------------------------
    // Attribute access
    // ------------------------------------------------------------------

    /// Read an attribute: get-hook if registered, else cast, else raw.
    pub fn get(&self, key: &str) -> Value {
        let raw = match self.attributes.get(key) {
            Some(value) => value.clone(),
            None => return Value::Null,
        };
        if let Some(hook) = self.class.getter(key) {
            return hook(&raw);
        }
        match self.effective_cast(key) {
            Some(cast) => cast.cast_get(&raw),
            None => raw,
        }
    }

    /// Write an attribute: set-hook if registered, else storage cast.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let stored = if let Some(hook) = self.class.setter(&key) {
            hook(&value)
        } else {
            match self.effective_cast(&key) {
                Some(cast) => cast.cast_set(&value),
                None => value,
            }
        };
        self.attributes.insert(key, stored);
    }

    fn force_set(&mut self, key: String, value: Value) {
        self.attributes.insert(key, value);
    }

    fn effective_cast(&self, key: &str) -> Option<CastKind> {
        self.class.cast_for(key).or_else(|| {
            self.class
                .dates()
                .iter()
                .any(|d| d == key)
                .then_some(CastKind::DateTime)
        })
    }

    /// Copy only keys the mass-assignment policy permits; everything else
    /// is silently dropped.
    pub fn fill<I, K, V>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            let key = key.into();
            if self.class.is_fillable(&key) {
                self.set(key, value);
            }
        }
        self
    }

    /// Set all provided keys, bypassing the fill policy.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set(key, value);
        }
        self
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Entries of `attributes` differing from `original`.
    pub fn get_dirty(&self) -> IndexMap<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self, keys: Option<&[&str]>) -> bool {
        let dirty = self.get_dirty();
        match keys {
            None => !dirty.is_empty(),
            Some(keys) => keys.iter().any(|key| dirty.contains_key(*key)),
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.is_dirty(None)
    }

    /// Changes persisted by the most recent `save`.
    pub fn was_changed(&self, key: Option<&str>) -> bool {
        match key {
            None => !self.last_changes.is_empty(),
            Some(key) => self.last_changes.contains_key(key),
        }
    }

    pub fn get_original(&self, key: &str) -> Value {
        self.original.get(key).cloned().unwrap_or(Value::Null)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist the record: INSERT when new, UPDATE of the dirty set when
    /// it exists. Returns `Ok(false)` when a cancellable listener vetoed
    /// the operation.
    pub fn save(&mut self, conn: &mut Connection) -> OrmResult<bool> {
        let class = self.class.clone();

        if !class.fire(RecordEvent::Saving, self) {
            return Ok(false);
        }

        if self.exists {
            if self.get_dirty().is_empty() {
                // Nothing to write; the save still completes.
                class.fire(RecordEvent::Saved, self);
                return Ok(true);
            }
            if !class.fire(RecordEvent::Updating, self) {
                return Ok(false);
            }
            if class.timestamps() {
                self.set("updated_at", now());
            }

            let dirty = self.get_dirty();
            let mut ir = QueryIr::select(class.qualified_table());
            ir.kind = QueryKind::Update;
            ir.values = dirty.clone();
            ir.wheres = self.key_wheres()?;
            let statement = conn.grammar().compile(&ir)?;
            conn.query(&statement)?;

            self.last_changes = dirty;
            class.fire(RecordEvent::Updated, self);
        } else {
            if !class.fire(RecordEvent::Creating, self) {
                return Ok(false);
            }
            if class.timestamps() {
                if self.attributes.get("created_at").is_none() {
                    self.set("created_at", now());
                }
                self.set("updated_at", now());
            }

            let mut ir = QueryIr::select(class.qualified_table());
            ir.kind = QueryKind::Insert;
            ir.values = self.attributes.clone();
            let statement = conn.grammar().compile(&ir)?;
            let result = conn.query(&statement)?;

            // Backfill an auto-assigned key when the backend reports one.
            if let Some(id) = result.last_insert_id {
                let pk = class.primary_key().to_string();
                if self.attributes.get(&pk).is_none() {
                    self.force_set(pk, Value::Int(id));
                }
            }

            self.exists = true;
            self.was_recently_created = true;
            self.last_changes = self.attributes.clone();
            class.fire(RecordEvent::Created, self);
        }

        self.original = self.attributes.clone();
        class.fire(RecordEvent::Saved, self);
        Ok(true)
    }

    /// `fill` + `save`. Returns `Ok(false)` on a record that does not
    /// exist yet.
    pub fn update<I, K, V>(&mut self, conn: &mut Connection, attributes: I) -> OrmResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if !self.exists {
            return Ok(false);
        }
        self.fill(attributes);
        self.save(conn)
    }

    /// Delete by identity. Soft-delete classes get an `UPDATE deleted_at`
    /// instead of a DELETE. Returns `Ok(false)` without touching the
    /// driver when the record does not exist.
    pub fn delete(&mut self, conn: &mut Connection) -> OrmResult<bool> {
        if !self.exists {
            return Ok(false);
        }

        let class = self.class.clone();
        if !class.fire(RecordEvent::Deleting, self) {
            return Ok(false);
        }

        let mut ir = QueryIr::select(class.qualified_table());
        ir.wheres = self.key_wheres()?;
        if class.soft_deletes() {
            ir.kind = QueryKind::Update;
            ir.values.insert("deleted_at".to_string(), now());
        } else {
            ir.kind = QueryKind::Delete;
        }
        let statement = conn.grammar().compile(&ir)?;
        conn.query(&statement)?;

        if class.soft_deletes() {
            self.set("deleted_at", now());
            self.original = self.attributes.clone();
        }
        self.exists = false;
        class.fire(RecordEvent::Deleted, self);
        Ok(true)
    }

    /// Clear `deleted_at` on a soft-deleted record and mark it live again.
    pub fn restore(&mut self, conn: &mut Connection) -> OrmResult<bool> {
        let class = self.class.clone();
        if !class.soft_deletes() {
            return Err(OrmError::unsupported(format!(
                "'{}' does not use soft deletes",
                class.name()
            )));
        }
        if !class.fire(RecordEvent::Restoring, self) {
            return Ok(false);
        }

        let mut ir = QueryIr::select(class.qualified_table());
        ir.kind = QueryKind::Update;
        ir.values.insert("deleted_at".to_string(), Value::Null);
        ir.wheres = self.key_wheres()?;
        let statement = conn.grammar().compile(&ir)?;
        conn.query(&statement)?;

        self.set("deleted_at", Value::Null);
        self.exists = true;
        self.original = self.attributes.clone();
        class.fire(RecordEvent::Restored, self);
        Ok(true)
    }

    /// Requery by identity and replace both attribute maps.
    pub fn refresh(&mut self, conn: &mut Connection) -> OrmResult<()> {
        let class = self.class.clone();
        let mut ir = QueryIr::select(class.qualified_table());
        ir.wheres = self.key_wheres()?;
        ir.limit = Some(1);
        let statement = conn.grammar().compile(&ir)?;
        let result = conn.query(&statement)?;

        let row = result
            .rows
            .first()
            .ok_or_else(|| OrmError::RecordNotFound(class.table().to_string()))?;
        self.attributes = result.columns.iter().cloned().zip(row.clone()).collect();
        self.original = self.attributes.clone();
        self.relations.clear();
        self.last_changes.clear();
        Ok(())
    }

    /// In-memory clone: all attributes except the identity columns, reset
    /// to a never-persisted state, overrides applied through the fill
    /// policy.
    pub fn replicate<I, K, V>(&self, overrides: I) -> Record
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let keys = self.class.key_columns();
        let mut copy = Record::new(self.class.clone(), self.models.clone());
        for (key, value) in &self.attributes {
            if !keys.iter().any(|k| k == key) {
                copy.force_set(key.clone(), value.clone());
            }
        }
        copy.fill(overrides);
        copy
    }

    /// Bump `updated_at` and save; then touch each named relation's
    /// records, one level deep.
    pub fn touch(&mut self, conn: &mut Connection, relations: &[&str]) -> OrmResult<bool> {
        self.set("updated_at", now());
        let saved = self.save(conn)?;
        if !saved {
            return Ok(false);
        }

        for name in relations {
            let related = load_for_parent(&self.models, conn, self, name)?;
            let mut touched = match related {
                Related::One(Some(record)) => vec![*record],
                Related::One(None) => Vec::new(),
                Related::Many(records) => records,
            };
            for record in &mut touched {
                record.touch(conn, &[])?;
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    pub fn relation_def(&self, name: &str) -> OrmResult<&RelationDef> {
        self.class.relation(name).ok_or_else(|| {
            OrmError::relation(format!(
                "'{}' has no relation named '{}'",
                self.class.name(),
                name
            ))
        })
    }

    /// Already-loaded relation result, if any.
    pub fn loaded(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub(crate) fn attach_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// Load (or return the cached) relation result.
    pub fn relation(&mut self, conn: &mut Connection, name: &str) -> OrmResult<&Related> {
        if !self.relations.contains_key(name) {
            let related = load_for_parent(&self.models.clone(), conn, self, name)?;
            self.relations.insert(name.to_string(), related);
        }
        Ok(&self.relations[name])
    }

    /// Pivot operations for a `BelongsToMany` relation.
    pub fn pivot_ops(&self, name: &str) -> OrmResult<PivotOps> {
        match self.relation_def(name)? {
            RelationDef::BelongsToMany(def) => {
                let parent_key = self.attributes.get(&def.parent_key).cloned().ok_or_else(|| {
                    OrmError::relation(format!(
                        "parent has no value for pivot key '{}'",
                        def.parent_key
                    ))
                })?;
                Ok(PivotOps::new(def.clone(), parent_key))
            }
            _ => Err(OrmError::relation(format!(
                "relation '{}' is not a belongs-to-many",
                name
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Visible attributes as a JSON object: the `visible` allow-list is
    /// applied first (when non-empty), then `hidden` keys are removed.
    /// Values go through get-hooks and casts.
    pub fn to_object(&self) -> serde_json::Value {
        let visible = self.class.visible();
        let hidden = self.class.hidden();

        let mut object = serde_json::Map::new();
        for key in self.attributes.keys() {
            if !visible.is_empty() && !visible.iter().any(|v| v == key) {
                continue;
            }
            if hidden.iter().any(|h| h == key) {
                continue;
            }
            object.insert(key.clone(), self.get(key).to_json());
        }
        serde_json::Value::Object(object)
    }

    pub fn to_json(&self) -> String {
        self.to_object().to_string()
    }

    /// Projection of selected attribute keys.
    pub fn only(&self, keys: &[&str]) -> IndexMap<String, Value> {
        keys.iter()
            .filter(|key| self.attributes.contains_key(**key))
            .map(|key| (key.to_string(), self.get(key)))
            .collect()
    }

    /// All attributes except the given keys.
    pub fn except(&self, keys: &[&str]) -> IndexMap<String, Value> {
        self.attributes
            .keys()
            .filter(|key| !keys.contains(&key.as_str()))
            .map(|key| (key.clone(), self.get(key)))
            .collect()
    }

    // ------------------------------------------------------------------

    /// Primary key value (or `Null` when unset).
    pub fn key(&self) -> Value {
        self.attributes
            .get(self.class.primary_key())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Identity predicate for UPDATE/DELETE/SELECT-by-key, using the
    /// original values where available so a dirtied key still addresses
    /// the stored row.
    fn key_wheres(&self) -> OrmResult<Vec<WhereClause>> {
        self.class
            .key_columns()
            .iter()
            .map(|column| {
                let value = self
                    .original
                    .get(column)
                    .or_else(|| self.attributes.get(column))
                    .cloned()
                    .ok_or_else(|| {
                        OrmError::query_failed(format!(
                            "record has no value for key column '{}'",
                            column
                        ))
                    })?;
                Ok(WhereClause::Basic {
                    column: column.clone(),
                    operator: "=".to_string(),
                    value,
                    connector: crate::ir::Connector::And,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("class", &self.class.name())
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

pub(crate) fn now() -> Value {
    Value::DateTime(Utc::now())
}
