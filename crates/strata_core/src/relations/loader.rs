use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::def::{BelongsToManyDef, RelationDef};
use crate::record::Related;
use crate::{
    Connection, Models, OrmError, OrmResult, QueryBuilder, Record, Value,
};

/// Resolve one relation for a single parent.
pub fn load_for_parent(
    models: &Models,
    conn: &mut Connection,
    parent: &Record,
    name: &str,
) -> OrmResult<Related> {
    let mut batch = vec![parent.clone()];
    eager_load(models, conn, &mut batch, &[name.to_string()])?;
    Ok(batch
        .remove(0)
        .loaded(name.split('.').next().unwrap_or(name))
        .cloned()
        .unwrap_or(Related::One(None)))
}

/// Batched eager loading.
///
/// For each requested relation the loader gathers the deduplicated parent
/// keys, issues one follow-up query (`WHERE fk IN (…)` or the morph/pivot
/// equivalent), groups the rows by parent key and attaches them. Dot paths
/// recurse against the related class; a visited set keyed by
/// `(class, relation)` bounds cyclic paths within one invocation.
pub fn eager_load(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    specs: &[String],
) -> OrmResult<()> {
    let mut visited = HashSet::new();
    load_level(models, conn, records, specs, &mut visited)
}

fn load_level(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    specs: &[String],
    visited: &mut HashSet<(String, String)>,
) -> OrmResult<()> {
    if records.is_empty() || specs.is_empty() {
        return Ok(());
    }

    let class = records[0].class().clone();

    // "posts.comments" → relation "posts" with child spec "comments".
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    for spec in specs {
        match spec.split_once('.') {
            Some((head, rest)) => grouped
                .entry(head.to_string())
                .or_default()
                .push(rest.to_string()),
            None => {
                grouped.entry(spec.clone()).or_default();
            }
        }
    }

    for (name, children) in grouped {
        if !visited.insert((class.name().to_string(), name.clone())) {
            continue;
        }

        let def = class
            .relation(&name)
            .ok_or_else(|| {
                OrmError::relation(format!(
                    "'{}' has no relation named '{}'",
                    class.name(),
                    name
                ))
            })?
            .clone();

        match def {
            RelationDef::HasOne {
                related,
                foreign_key,
                local_key,
            } => {
                load_has(
                    models, conn, records, &name, &children, visited, &related, &foreign_key,
                    &local_key, true,
                )?;
            }
            RelationDef::HasMany {
                related,
                foreign_key,
                local_key,
            } => {
                load_has(
                    models, conn, records, &name, &children, visited, &related, &foreign_key,
                    &local_key, false,
                )?;
            }
            RelationDef::BelongsTo {
                related,
                foreign_key,
                owner_key,
            } => {
                load_belongs_to(
                    models, conn, records, &name, &children, visited, &related, &foreign_key,
                    &owner_key,
                )?;
            }
            RelationDef::BelongsToMany(def) => {
                load_belongs_to_many(models, conn, records, &name, &children, visited, &def)?;
            }
            RelationDef::MorphOne {
                related,
                morph_type,
                morph_id,
                local_key,
            } => {
                load_morph(
                    models, conn, records, &name, &children, visited, &related, &morph_type,
                    &morph_id, &local_key, true,
                )?;
            }
            RelationDef::MorphMany {
                related,
                morph_type,
                morph_id,
                local_key,
            } => {
                load_morph(
                    models, conn, records, &name, &children, visited, &related, &morph_type,
                    &morph_id, &local_key, false,
                )?;
            }
            RelationDef::MorphTo {
                morph_type,
                morph_id,
                owner_key,
                morph_map,
            } => {
                load_morph_to(
                    models, conn, records, &name, &children, visited, &morph_type, &morph_id,
                    &owner_key, &morph_map,
                )?;
            }
        }
    }

    Ok(())
}

/// Deduplicated, non-null values of one column across the parent set.
fn gather_keys(records: &[Record], column: &str) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for record in records {
        if let Some(value) = record.attributes().get(column) {
            if !value.is_null() && seen.insert(value.clone()) {
                keys.push(value.clone());
            }
        }
    }
    keys
}

fn group_by_column(records: Vec<Record>, column: &str) -> BTreeMap<Value, Vec<Record>> {
    let mut groups: BTreeMap<Value, Vec<Record>> = BTreeMap::new();
    for record in records {
        if let Some(key) = record.attributes().get(column).cloned() {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

fn related_query(models: &Models, related: &str) -> OrmResult<QueryBuilder> {
    models
        .query(related)
        .map_err(|_| OrmError::relation(format!("relation targets unknown class '{}'", related)))
}

fn attach_grouped(
    records: &mut [Record],
    name: &str,
    key_column: &str,
    groups: BTreeMap<Value, Vec<Record>>,
    to_one: bool,
) {
    // Groups are cloned per parent: inverse relations can share one owner
    // row across many parents.
    for parent in records.iter_mut() {
        let matches = parent
            .attributes()
            .get(key_column)
            .and_then(|key| groups.get(key))
            .cloned()
            .unwrap_or_default();

        let related = if to_one {
            Related::One(matches.into_iter().next().map(Box::new))
        } else {
            Related::Many(matches)
        };
        parent.attach_relation(name, related);
    }
}

#[allow(clippy::too_many_arguments)]
fn load_has(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    name: &str,
    children: &[String],
    visited: &mut HashSet<(String, String)>,
    related: &str,
    foreign_key: &str,
    local_key: &str,
    to_one: bool,
) -> OrmResult<()> {
    let keys = gather_keys(records, local_key);
    let mut fetched = if keys.is_empty() {
        Vec::new()
    } else {
        related_query(models, related)?
            .where_in(foreign_key, keys)
            .get(conn)?
    };

    load_level(models, conn, &mut fetched, children, visited)?;
    let groups = group_by_column(fetched, foreign_key);
    attach_grouped(records, name, local_key, groups, to_one);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn load_belongs_to(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    name: &str,
    children: &[String],
    visited: &mut HashSet<(String, String)>,
    related: &str,
    foreign_key: &str,
    owner_key: &str,
) -> OrmResult<()> {
    let keys = gather_keys(records, foreign_key);
    let mut fetched = if keys.is_empty() {
        Vec::new()
    } else {
        related_query(models, related)?
            .where_in(owner_key, keys)
            .get(conn)?
    };

    load_level(models, conn, &mut fetched, children, visited)?;
    let groups = group_by_column(fetched, owner_key);
    attach_grouped(records, name, foreign_key, groups, true);
    Ok(())
}

fn load_belongs_to_many(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    name: &str,
    children: &[String],
    visited: &mut HashSet<(String, String)>,
    def: &BelongsToManyDef,
) -> OrmResult<()> {
    let parent_keys = gather_keys(records, &def.parent_key);

    // The pivot select projects both pivot-side keys so grouping can
    // partition rows per parent.
    let mut pivot_columns = vec![
        def.foreign_pivot_key.clone(),
        def.related_pivot_key.clone(),
    ];
    pivot_columns.extend(def.pivot_columns.iter().cloned());

    let pivot_rows = if parent_keys.is_empty() {
        crate::RowSet::empty()
    } else {
        let column_refs: Vec<&str> = pivot_columns.iter().map(String::as_str).collect();
        QueryBuilder::table(&def.pivot_table)
            .select(&column_refs)
            .where_in(&def.foreign_pivot_key, parent_keys)
            .get_rows(conn)?
    };

    let pivot_maps: Vec<IndexMap<String, Value>> = pivot_rows
        .rows
        .into_iter()
        .map(|row| pivot_rows.columns.iter().cloned().zip(row).collect())
        .collect();

    let related_ids: Vec<Value> = {
        let mut seen = BTreeSet::new();
        pivot_maps
            .iter()
            .filter_map(|row| row.get(&def.related_pivot_key))
            .filter(|value| !value.is_null())
            .filter(|value| seen.insert((*value).clone()))
            .cloned()
            .collect()
    };

    let mut fetched = if related_ids.is_empty() {
        Vec::new()
    } else {
        related_query(models, &def.related)?
            .where_in(&def.related_key, related_ids)
            .get(conn)?
    };
    load_level(models, conn, &mut fetched, children, visited)?;

    let by_related_key: BTreeMap<Value, Record> = fetched
        .into_iter()
        .filter_map(|record| {
            record
                .attributes()
                .get(&def.related_key)
                .cloned()
                .map(|key| (key, record))
        })
        .collect();

    let mut groups: BTreeMap<Value, Vec<Record>> = BTreeMap::new();
    for pivot in pivot_maps {
        let (Some(parent_key), Some(related_key)) = (
            pivot.get(&def.foreign_pivot_key).cloned(),
            pivot.get(&def.related_pivot_key),
        ) else {
            continue;
        };
        if let Some(record) = by_related_key.get(related_key) {
            let mut record = record.clone();
            record.set_pivot(pivot.clone());
            groups.entry(parent_key).or_default().push(record);
        }
    }

    for parent in records.iter_mut() {
        let matches = parent
            .attributes()
            .get(&def.parent_key)
            .and_then(|key| groups.get(key))
            .cloned()
            .unwrap_or_default();
        parent.attach_relation(name, Related::Many(matches));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn load_morph(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    name: &str,
    children: &[String],
    visited: &mut HashSet<(String, String)>,
    related: &str,
    morph_type: &str,
    morph_id: &str,
    local_key: &str,
    to_one: bool,
) -> OrmResult<()> {
    let tag = records[0].class().morph_tag();
    let keys = gather_keys(records, local_key);

    let mut fetched = if keys.is_empty() {
        Vec::new()
    } else {
        related_query(models, related)?
            .where_eq(morph_type, tag)
            .where_in(morph_id, keys)
            .get(conn)?
    };

    load_level(models, conn, &mut fetched, children, visited)?;
    let groups = group_by_column(fetched, morph_id);
    attach_grouped(records, name, local_key, groups, to_one);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn load_morph_to(
    models: &Models,
    conn: &mut Connection,
    records: &mut [Record],
    name: &str,
    children: &[String],
    visited: &mut HashSet<(String, String)>,
    morph_type: &str,
    morph_id: &str,
    owner_key: &str,
    morph_map: &std::collections::HashMap<String, String>,
) -> OrmResult<()> {
    // Bucket parents per morph tag: one query per distinct parent class.
    let mut buckets: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (index, record) in records.iter().enumerate() {
        let Some(tag) = record
            .attributes()
            .get(morph_type)
            .and_then(|v| v.as_str().map(str::to_string))
        else {
            continue;
        };
        buckets.entry(tag).or_default().push(index);
    }

    for (tag, indexes) in buckets {
        let class_name = morph_map.get(&tag).ok_or_else(|| {
            OrmError::relation(format!("no class registered for morph tag '{}'", tag))
        })?;

        let ids: Vec<Value> = {
            let mut seen = BTreeSet::new();
            indexes
                .iter()
                .filter_map(|&i| records[i].attributes().get(morph_id))
                .filter(|value| !value.is_null())
                .filter(|value| seen.insert((*value).clone()))
                .cloned()
                .collect()
        };

        let mut fetched = if ids.is_empty() {
            Vec::new()
        } else {
            related_query(models, class_name)?
                .where_in(owner_key, ids)
                .get(conn)?
        };
        load_level(models, conn, &mut fetched, children, visited)?;

        let groups = group_by_column(fetched, owner_key);
        for &index in &indexes {
            let matched = records[index]
                .attributes()
                .get(morph_id)
                .and_then(|key| groups.get(key))
                .and_then(|group| group.first().cloned());
            records[index].attach_relation(name, Related::One(matched.map(Box::new)));
        }
    }

    // Parents with no recognizable tag resolve to nothing.
    for record in records.iter_mut() {
        if record.loaded(name).is_none() {
            record.attach_relation(name, Related::One(None));
        }
    }
    Ok(())
}
