use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::events::{dispatch_observer, Listener, Observer, RecordEvent};
use crate::relations::{BelongsToManyDef, RelationDef};
use crate::{CastKind, OrmError, OrmResult, QueryBuilder, Record, Value};

/// Per-column accessor hook. The Rust rendition of attribute mutators:
/// explicitly registered, no reflective name matching.
pub type Mutator = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Static descriptor for a family of records: table, keys, policy sets,
/// casts, accessor hooks, relations, observers.
///
/// Built once through `ModelClass::builder` and shared as `Arc`; it owns
/// no mutable state.
pub struct ModelClass {
    name: String,
    table: String,
    primary_key: String,
    connection: Option<String>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    visible: Vec<String>,
    casts: HashMap<String, CastKind>,
    dates: Vec<String>,
    timestamps: bool,
    soft_deletes: bool,
    partition_keys: Vec<String>,
    clustering_keys: Vec<String>,
    keyspace: Option<String>,
    morph_tag: Option<String>,
    relations: IndexMap<String, RelationDef>,
    getters: HashMap<String, Mutator>,
    setters: HashMap<String, Mutator>,
    observers: Vec<Arc<dyn Observer>>,
    listeners: HashMap<RecordEvent, Vec<Listener>>,
}

impl ModelClass {
    pub fn builder(name: impl Into<String>) -> ModelClassBuilder {
        ModelClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Table reference as the grammar sees it, keyspace-qualified when one
    /// is declared.
    pub fn qualified_table(&self) -> String {
        match &self.keyspace {
            Some(keyspace) => format!("{}.{}", keyspace, self.table),
            None => self.table.clone(),
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn hidden(&self) -> &[String] {
        &self.hidden
    }

    pub fn visible(&self) -> &[String] {
        &self.visible
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    /// Identity columns: partition + clustering keys when declared (the
    /// wide-column case), otherwise the primary key.
    pub fn key_columns(&self) -> Vec<String> {
        if self.partition_keys.is_empty() && self.clustering_keys.is_empty() {
            vec![self.primary_key.clone()]
        } else {
            self.partition_keys
                .iter()
                .chain(self.clustering_keys.iter())
                .cloned()
                .collect()
        }
    }

    /// Mass-assignment policy: a non-empty `fillable` governs; otherwise
    /// `guarded = ["*"]` rejects everything and named guards reject their
    /// keys.
    pub fn is_fillable(&self, key: &str) -> bool {
        if !self.fillable.is_empty() {
            return self.fillable.iter().any(|f| f == key);
        }
        if self.guarded.iter().any(|g| g == "*") {
            return false;
        }
        !self.guarded.iter().any(|g| g == key)
    }

    pub fn cast_for(&self, key: &str) -> Option<CastKind> {
        self.casts.get(key).copied()
    }

    pub fn getter(&self, key: &str) -> Option<&Mutator> {
        self.getters.get(key)
    }

    pub fn setter(&self, key: &str) -> Option<&Mutator> {
        self.setters.get(key)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Tag stored in morph-type columns for this class. Defaults to the
    /// lowercased class name.
    pub fn morph_tag(&self) -> String {
        self.morph_tag
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }

    /// Dispatch one lifecycle event: observers first, then ad-hoc
    /// listeners, each group in registration order. Returns `false` when a
    /// cancellable event was vetoed.
    pub fn fire(&self, event: RecordEvent, record: &mut Record) -> bool {
        for observer in &self.observers {
            let proceed = dispatch_observer(observer.as_ref(), event, record);
            if !proceed && event.is_cancellable() {
                return false;
            }
        }
        if let Some(listeners) = self.listeners.get(&event) {
            for listener in listeners {
                let proceed = listener(record);
                if !proceed && event.is_cancellable() {
                    return false;
                }
            }
        }
        true
    }
}

impl std::fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

/// Builder for `ModelClass`. Everything not set falls back to convention:
/// table = snake_case plural of the class name, primary key = `id`,
/// guarded = `["*"]` (so `fillable` governs mass assignment).
pub struct ModelClassBuilder {
    name: String,
    table: Option<String>,
    primary_key: String,
    connection: Option<String>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    visible: Vec<String>,
    casts: HashMap<String, CastKind>,
    dates: Vec<String>,
    timestamps: bool,
    soft_deletes: bool,
    partition_keys: Vec<String>,
    clustering_keys: Vec<String>,
    keyspace: Option<String>,
    morph_tag: Option<String>,
    relations: IndexMap<String, RelationDef>,
    getters: HashMap<String, Mutator>,
    setters: HashMap<String, Mutator>,
    observers: Vec<Arc<dyn Observer>>,
    listeners: HashMap<RecordEvent, Vec<Listener>>,
}

impl ModelClassBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            connection: None,
            fillable: Vec::new(),
            guarded: vec!["*".to_string()],
            hidden: Vec::new(),
            visible: Vec::new(),
            casts: HashMap::new(),
            dates: Vec::new(),
            timestamps: false,
            soft_deletes: false,
            partition_keys: Vec::new(),
            clustering_keys: Vec::new(),
            keyspace: None,
            morph_tag: None,
            relations: IndexMap::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
            observers: Vec::new(),
            listeners: HashMap::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn fillable(mut self, keys: &[&str]) -> Self {
        self.fillable = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn guarded(mut self, keys: &[&str]) -> Self {
        self.guarded = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn hidden(mut self, keys: &[&str]) -> Self {
        self.hidden = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn visible(mut self, keys: &[&str]) -> Self {
        self.visible = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn cast(mut self, key: impl Into<String>, kind: &str) -> Self {
        if let Some(cast) = CastKind::parse(kind) {
            self.casts.insert(key.into(), cast);
        }
        self
    }

    pub fn dates(mut self, keys: &[&str]) -> Self {
        self.dates = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Rewrites deletes into `deleted_at` updates and scopes selects to
    /// live rows. On the wide-column backend the live-row scope needs an
    /// index or `ALLOW FILTERING`; the builder does not opt in implicitly.
    pub fn soft_deletes(mut self, enabled: bool) -> Self {
        self.soft_deletes = enabled;
        self
    }

    pub fn partition_keys(mut self, keys: &[&str]) -> Self {
        self.partition_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn clustering_keys(mut self, keys: &[&str]) -> Self {
        self.clustering_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Override the tag stored in morph-type columns for this class.
    pub fn morph_tag(mut self, tag: impl Into<String>) -> Self {
        self.morph_tag = Some(tag.into());
        self
    }

    pub fn on_get(
        mut self,
        key: impl Into<String>,
        hook: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(key.into(), Arc::new(hook));
        self
    }

    pub fn on_set(
        mut self,
        key: impl Into<String>,
        hook: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.setters.insert(key.into(), Arc::new(hook));
        self
    }

    pub fn observe(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn on(
        mut self,
        event: RecordEvent,
        listener: impl Fn(&mut Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.listeners
            .entry(event)
            .or_default()
            .push(Arc::new(listener));
        self
    }

    pub fn has_one(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::HasOne {
                related: related.into(),
                foreign_key: foreign_key.into(),
                local_key: local_key.into(),
            },
        );
        self
    }

    pub fn has_many(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::HasMany {
                related: related.into(),
                foreign_key: foreign_key.into(),
                local_key: local_key.into(),
            },
        );
        self
    }

    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        owner_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::BelongsTo {
                related: related.into(),
                foreign_key: foreign_key.into(),
                owner_key: owner_key.into(),
            },
        );
        self
    }

    pub fn belongs_to_many(mut self, name: impl Into<String>, def: BelongsToManyDef) -> Self {
        self.relations.insert(name.into(), RelationDef::BelongsToMany(def));
        self
    }

    pub fn morph_one(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        morph_name: &str,
        local_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::MorphOne {
                related: related.into(),
                morph_type: format!("{}_type", morph_name),
                morph_id: format!("{}_id", morph_name),
                local_key: local_key.into(),
            },
        );
        self
    }

    pub fn morph_many(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        morph_name: &str,
        local_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::MorphMany {
                related: related.into(),
                morph_type: format!("{}_type", morph_name),
                morph_id: format!("{}_id", morph_name),
                local_key: local_key.into(),
            },
        );
        self
    }

    pub fn morph_to(
        mut self,
        name: impl Into<String>,
        morph_name: &str,
        owner_key: impl Into<String>,
        morph_map: &[(&str, &str)],
    ) -> Self {
        self.relations.insert(
            name.into(),
            RelationDef::MorphTo {
                morph_type: format!("{}_type", morph_name),
                morph_id: format!("{}_id", morph_name),
                owner_key: owner_key.into(),
                morph_map: morph_map
                    .iter()
                    .map(|(tag, class)| (tag.to_string(), class.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn build(self) -> Arc<ModelClass> {
        let table = self
            .table
            .unwrap_or_else(|| format!("{}s", snake_case(&self.name)));
        Arc::new(ModelClass {
            name: self.name,
            table,
            primary_key: self.primary_key,
            connection: self.connection,
            fillable: self.fillable,
            guarded: self.guarded,
            hidden: self.hidden,
            visible: self.visible,
            casts: self.casts,
            dates: self.dates,
            timestamps: self.timestamps,
            soft_deletes: self.soft_deletes,
            partition_keys: self.partition_keys,
            clustering_keys: self.clustering_keys,
            keyspace: self.keyspace,
            morph_tag: self.morph_tag,
            relations: self.relations,
            getters: self.getters,
            setters: self.setters,
            observers: self.observers,
            listeners: self.listeners,
        })
    }
}

/// Registered model classes, shared cheaply by clone. Relation targets and
/// morph maps resolve through this.
#[derive(Clone, Default)]
pub struct Models {
    classes: Arc<RwLock<HashMap<String, Arc<ModelClass>>>>,
}

impl Models {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, class: Arc<ModelClass>) {
        write_lock(&self.classes).insert(class.name().to_string(), class);
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<ModelClass>> {
        read_lock(&self.classes)
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::Configuration(format!("unknown model class '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        read_lock(&self.classes).contains_key(name)
    }

    /// Query builder bound to a registered class.
    pub fn query(&self, name: &str) -> OrmResult<QueryBuilder> {
        let class = self.get(name)?;
        Ok(QueryBuilder::for_class(class, self.clone()))
    }

    /// Fresh unsaved record of a registered class.
    pub fn record(&self, name: &str) -> OrmResult<Record> {
        let class = self.get(name)?;
        Ok(Record::new(class, self.clone()))
    }
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

/// `UserProfile` → `user_profile`.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_inferred_from_class_name() {
        let class = ModelClass::builder("UserProfile").build();
        assert_eq!(class.table(), "user_profiles");

        let class = ModelClass::builder("Post").table("articles").build();
        assert_eq!(class.table(), "articles");
    }

    #[test]
    fn fillable_governs_when_non_empty() {
        let class = ModelClass::builder("User")
            .fillable(&["name", "email"])
            .build();
        assert!(class.is_fillable("name"));
        assert!(!class.is_fillable("is_admin"));
    }

    #[test]
    fn default_guard_rejects_everything() {
        let class = ModelClass::builder("User").build();
        assert!(!class.is_fillable("name"));
    }

    #[test]
    fn named_guards_reject_their_keys() {
        let class = ModelClass::builder("User").guarded(&["is_admin"]).build();
        assert!(class.is_fillable("name"));
        assert!(!class.is_fillable("is_admin"));
    }

    #[test]
    fn key_columns_prefer_partition_and_clustering_keys() {
        let class = ModelClass::builder("Event")
            .partition_keys(&["tenant"])
            .clustering_keys(&["occurred_at"])
            .build();
        assert_eq!(class.key_columns(), vec!["tenant", "occurred_at"]);

        let class = ModelClass::builder("User").build();
        assert_eq!(class.key_columns(), vec!["id"]);
    }

    #[test]
    fn morph_tag_defaults_to_lowercased_name() {
        let class = ModelClass::builder("Post").build();
        assert_eq!(class.morph_tag(), "post");

        let class = ModelClass::builder("Post").morph_tag("article").build();
        assert_eq!(class.morph_tag(), "article");
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("UserProfile"), "user_profile");
        assert_eq!(snake_case("HTTPLog"), "h_t_t_p_log");
    }
}
