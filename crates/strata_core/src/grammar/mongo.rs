use serde_json::{json, Map, Value as Json};

use super::sql::require_table;
use crate::ir::{parse_aggregate_expression, Connector, Direction, QueryIr, QueryKind, WhereClause};
use crate::{Grammar, OrmError, OrmResult, Statement, Value};

/// Document-store compiler.
///
/// Output is not SQL: a compiled statement is a directive string of the
/// shape `<collection>:<op>:<payload-json>` that the document driver
/// parses and dispatches to the native client. Values are embedded in the
/// payload, so `Statement::params` is always empty.
pub struct MongoGrammar;

impl Grammar for MongoGrammar {
    fn compile(&self, ir: &QueryIr) -> OrmResult<Statement> {
        reject_foreign_options(ir)?;

        match ir.kind {
            QueryKind::Select => compile_select(ir),
            QueryKind::Insert => compile_insert(ir),
            QueryKind::Update => compile_update(ir),
            QueryKind::Delete => compile_delete(ir),
        }
    }

    fn compile_rename_table(&self, from: &str, to: &str) -> OrmResult<Statement> {
        Ok(directive(from, "renameCollection", json!({ "to": to })))
    }
}

impl MongoGrammar {
    pub fn compile_create_collection(&self, name: &str) -> Statement {
        directive(name, "createCollection", json!({}))
    }

    pub fn compile_coll_mod(&self, name: &str, options: Json) -> Statement {
        directive(name, "collMod", options)
    }

    pub fn compile_list_collections(&self) -> Statement {
        directive("*", "listCollections", json!({}))
    }

    /// Probe whether any document in the collection carries the field.
    pub fn compile_exists_field(&self, collection: &str, field: &str) -> Statement {
        directive(collection, "existsField", json!({ "field": field }))
    }
}

fn directive(collection: &str, op: &str, payload: Json) -> Statement {
    Statement::raw(format!("{}:{}:{}", collection, op, canonical_json(&payload)))
}

/// Serialize with object keys sorted, so directives are byte-stable no
/// matter how `serde_json`'s map type is configured downstream.
fn canonical_json(value: &Json) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Json, out: &mut String) {
    match value {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Json::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn reject_foreign_options(ir: &QueryIr) -> OrmResult<()> {
    if ir.ttl.is_some() {
        return Err(OrmError::unsupported(
            "TTL is only available on the wide-column backend",
        ));
    }
    if !ir.returning.is_empty() {
        return Err(OrmError::unsupported(
            "RETURNING is not available on the document backend",
        ));
    }
    if !ir.joins.is_empty() || !ir.ctes.is_empty() {
        return Err(OrmError::unsupported(
            "joins and CTEs are not available on the document backend",
        ));
    }
    if ir.allow_filtering || ir.if_not_exists || !ir.if_conditions.is_empty() {
        return Err(OrmError::unsupported(
            "wide-column options are not available on the document backend",
        ));
    }
    Ok(())
}

fn compile_select(ir: &QueryIr) -> OrmResult<Statement> {
    let collection = require_table(ir)?;

    if !ir.groups.is_empty() || ir.has_aggregate_columns() {
        return compile_aggregate(ir, collection);
    }

    let mut payload = Map::new();
    payload.insert("filter".to_string(), filter_from_wheres(&ir.wheres)?);

    let mut options = Map::new();
    let projection: Map<String, Json> = ir
        .columns
        .iter()
        .filter(|c| c.as_str() != "*")
        .map(|c| (c.clone(), json!(1)))
        .collect();
    if !projection.is_empty() {
        options.insert("projection".to_string(), Json::Object(projection));
    }
    if !ir.orders.is_empty() {
        options.insert("sort".to_string(), sort_document(ir));
    }
    if let Some(offset) = ir.offset {
        options.insert("skip".to_string(), json!(offset));
    }
    if let Some(limit) = ir.limit {
        options.insert("limit".to_string(), json!(limit));
    }
    if !options.is_empty() {
        payload.insert("options".to_string(), Json::Object(options));
    }

    Ok(directive(collection, "find", Json::Object(payload)))
}

fn compile_aggregate(ir: &QueryIr, collection: &str) -> OrmResult<Statement> {
    let mut pipeline = Vec::new();

    let filter = filter_from_wheres(&ir.wheres)?;
    if filter.as_object().map(|o| !o.is_empty()).unwrap_or(true) {
        pipeline.push(json!({ "$match": filter }));
    }

    let group_id = match ir.groups.len() {
        0 => Json::Null,
        1 => json!(format!("${}", ir.groups[0])),
        _ => {
            let spec: Map<String, Json> = ir
                .groups
                .iter()
                .map(|g| (g.clone(), json!(format!("${}", g))))
                .collect();
            Json::Object(spec)
        }
    };

    let mut group = Map::new();
    group.insert("_id".to_string(), group_id);
    for column in &ir.columns {
        if let Some((func, arg, alias)) = parse_aggregate_expression(column) {
            group.insert(alias, accumulator(&func, &arg));
        }
    }
    pipeline.push(json!({ "$group": Json::Object(group) }));

    if !ir.havings.is_empty() {
        pipeline.push(json!({ "$match": filter_from_wheres(&ir.havings)? }));
    }
    if !ir.orders.is_empty() {
        pipeline.push(json!({ "$sort": sort_document(ir) }));
    }
    if let Some(offset) = ir.offset {
        pipeline.push(json!({ "$skip": offset }));
    }
    if let Some(limit) = ir.limit {
        pipeline.push(json!({ "$limit": limit }));
    }

    Ok(directive(collection, "aggregate", Json::Array(pipeline)))
}

fn accumulator(func: &str, arg: &str) -> Json {
    match func {
        // count(col) counts matched documents, same as count(*).
        "count" => json!({ "$sum": 1 }),
        "sum" => json!({ "$sum": format!("${}", arg) }),
        "avg" => json!({ "$avg": format!("${}", arg) }),
        "min" => json!({ "$min": format!("${}", arg) }),
        "max" => json!({ "$max": format!("${}", arg) }),
        _ => Json::Null,
    }
}

fn sort_document(ir: &QueryIr) -> Json {
    let sort: Map<String, Json> = ir
        .orders
        .iter()
        .map(|o| {
            let direction = match o.direction {
                Direction::Asc => 1,
                Direction::Desc => -1,
            };
            (o.column.clone(), json!(direction))
        })
        .collect();
    Json::Object(sort)
}

fn compile_insert(ir: &QueryIr) -> OrmResult<Statement> {
    let collection = require_table(ir)?;
    if ir.values.is_empty() {
        return Err(OrmError::query_failed("insert requires at least one value"));
    }

    let document = values_document(ir);

    // Upsert requests compile to updateMany with $set, per the document
    // backend's upsert contract.
    if let Some(conflict) = &ir.on_conflict {
        let filter: Map<String, Json> = conflict
            .columns
            .iter()
            .filter_map(|c| ir.values.get(c).map(|v| (c.clone(), v.to_json())))
            .collect();
        let payload = json!({
            "filter": Json::Object(filter),
            "update": { "$set": document },
            "options": { "upsert": true }
        });
        return Ok(directive(collection, "updateMany", payload));
    }

    Ok(directive(collection, "insertOne", document))
}

fn compile_update(ir: &QueryIr) -> OrmResult<Statement> {
    let collection = require_table(ir)?;
    if ir.values.is_empty() {
        return Err(OrmError::query_failed("update requires at least one assignment"));
    }

    let payload = json!({
        "filter": filter_from_wheres(&ir.wheres)?,
        "update": { "$set": values_document(ir) }
    });
    Ok(directive(collection, "updateMany", payload))
}

fn compile_delete(ir: &QueryIr) -> OrmResult<Statement> {
    let collection = require_table(ir)?;
    let payload = json!({ "filter": filter_from_wheres(&ir.wheres)? });
    Ok(directive(collection, "deleteMany", payload))
}

fn values_document(ir: &QueryIr) -> Json {
    let document: Map<String, Json> = ir
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Json::Object(document)
}

/// Build a find filter from the where sequence. Clauses are bucketed into
/// OR groups (a clause with an `Or` connector starts a new group); each
/// group AND-merges its clauses.
fn filter_from_wheres(clauses: &[WhereClause]) -> OrmResult<Json> {
    if clauses.is_empty() {
        return Ok(json!({}));
    }

    let mut groups: Vec<Vec<&WhereClause>> = vec![Vec::new()];
    for (index, clause) in clauses.iter().enumerate() {
        if index > 0 && clause.connector() == Connector::Or {
            groups.push(Vec::new());
        }
        groups.last_mut().expect("non-empty").push(clause);
    }

    let mut compiled_groups = Vec::with_capacity(groups.len());
    for group in groups {
        compiled_groups.push(merge_group(&group)?);
    }

    if compiled_groups.len() == 1 {
        Ok(compiled_groups.pop().expect("one group"))
    } else {
        Ok(json!({ "$or": compiled_groups }))
    }
}

fn merge_group(group: &[&WhereClause]) -> OrmResult<Json> {
    let mut merged = Map::new();
    let mut overflow = Vec::new();

    for clause in group {
        let (key, condition) = compile_clause(clause)?;
        if merged.contains_key(&key) {
            overflow.push(single_field(key, condition));
        } else {
            merged.insert(key, condition);
        }
    }

    if overflow.is_empty() {
        return Ok(Json::Object(merged));
    }

    // Same field constrained twice: fall back to an explicit $and list.
    let mut all: Vec<Json> = merged
        .into_iter()
        .map(|(k, v)| single_field(k, v))
        .collect();
    all.extend(overflow);
    Ok(json!({ "$and": all }))
}

fn single_field(key: String, condition: Json) -> Json {
    let mut object = Map::new();
    object.insert(key, condition);
    Json::Object(object)
}

fn compile_clause(clause: &WhereClause) -> OrmResult<(String, Json)> {
    match clause {
        WhereClause::Basic {
            column,
            operator,
            value,
            ..
        } => {
            let condition = match operator.as_str() {
                "=" => value.to_json(),
                "!=" | "<>" => json!({ "$ne": value.to_json() }),
                ">" => json!({ "$gt": value.to_json() }),
                ">=" => json!({ "$gte": value.to_json() }),
                "<" => json!({ "$lt": value.to_json() }),
                "<=" => json!({ "$lte": value.to_json() }),
                "like" | "LIKE" => json!({ "$regex": like_to_regex(value) }),
                other => {
                    return Err(OrmError::unsupported(format!(
                        "operator '{}' has no document-store form",
                        other
                    )));
                }
            };
            Ok((column.clone(), condition))
        }
        WhereClause::In { column, values, .. } => {
            let list: Vec<Json> = values.iter().map(Value::to_json).collect();
            Ok((column.clone(), json!({ "$in": list })))
        }
        WhereClause::NotIn { column, values, .. } => {
            let list: Vec<Json> = values.iter().map(Value::to_json).collect();
            Ok((column.clone(), json!({ "$nin": list })))
        }
        WhereClause::Between {
            column, low, high, ..
        } => Ok((
            column.clone(),
            json!({ "$gte": low.to_json(), "$lte": high.to_json() }),
        )),
        WhereClause::Null { column, .. } => Ok((column.clone(), Json::Null)),
        WhereClause::NotNull { column, .. } => Ok((column.clone(), json!({ "$ne": Json::Null }))),
        WhereClause::Exists { .. } | WhereClause::NotExists { .. } => Err(OrmError::unsupported(
            "sub-queries are not available on the document backend",
        )),
        WhereClause::Token { .. } => Err(OrmError::unsupported(
            "TOKEN comparisons are only available on the wide-column backend",
        )),
        WhereClause::Raw { .. } => Err(OrmError::unsupported(
            "raw SQL fragments are not available on the document backend",
        )),
    }
}

fn like_to_regex(value: &Value) -> String {
    let pattern = value.display();
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c if "\\.+*?()|[]{}^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex
}
