use indexmap::IndexMap;

use crate::Value;

/// The operation a query IR describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

/// Boolean connector applied from the second where clause onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connector {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: String,
    pub second: String,
}

/// Common table expression. Compiled before the main statement, so its
/// parameters bind first.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Box<QueryIr>,
}

/// Wide-column lightweight-transaction condition (`IF col op ?`).
#[derive(Debug, Clone, PartialEq)]
pub struct IfCondition {
    pub column: String,
    pub operator: String,
    pub value: Value,
}

/// Relational upsert clause. `update = None` compiles to the dialect's
/// do-nothing form.
#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    pub columns: Vec<String>,
    pub update: Option<IndexMap<String, Value>>,
}

/// One predicate in the WHERE (or HAVING) sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    Basic {
        column: String,
        operator: String,
        value: Value,
        connector: Connector,
    },
    In {
        column: String,
        values: Vec<Value>,
        connector: Connector,
    },
    NotIn {
        column: String,
        values: Vec<Value>,
        connector: Connector,
    },
    /// Binds two parameters in `[low, high]` order.
    Between {
        column: String,
        low: Value,
        high: Value,
        connector: Connector,
    },
    Null {
        column: String,
        connector: Connector,
    },
    NotNull {
        column: String,
        connector: Connector,
    },
    Exists {
        query: Box<QueryIr>,
        connector: Connector,
    },
    NotExists {
        query: Box<QueryIr>,
        connector: Connector,
    },
    /// Wide-column token comparison over the partition key columns.
    Token {
        columns: Vec<String>,
        operator: String,
        values: Vec<Value>,
        connector: Connector,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        connector: Connector,
    },
}

impl WhereClause {
    pub fn connector(&self) -> Connector {
        match self {
            WhereClause::Basic { connector, .. }
            | WhereClause::In { connector, .. }
            | WhereClause::NotIn { connector, .. }
            | WhereClause::Between { connector, .. }
            | WhereClause::Null { connector, .. }
            | WhereClause::NotNull { connector, .. }
            | WhereClause::Exists { connector, .. }
            | WhereClause::NotExists { connector, .. }
            | WhereClause::Token { connector, .. }
            | WhereClause::Raw { connector, .. } => *connector,
        }
    }
}

/// Backend-neutral description of one intended database operation.
///
/// Plain data: cloning yields a structurally independent deep copy. The
/// builder accumulates into this and the grammars compile out of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryIr {
    pub kind: QueryKind,
    /// Target table or collection (`from` for SELECT/DELETE, `table` for
    /// INSERT/UPDATE — same slot, two builder spellings).
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub distinct: bool,
    pub wheres: Vec<WhereClause>,
    pub orders: Vec<OrderClause>,
    pub groups: Vec<String>,
    pub havings: Vec<WhereClause>,
    pub joins: Vec<JoinClause>,
    pub ctes: Vec<Cte>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// INSERT/UPDATE assignments; insertion order drives binding order.
    pub values: IndexMap<String, Value>,

    // Wide-column-only options.
    pub allow_filtering: bool,
    pub if_not_exists: bool,
    pub if_conditions: Vec<IfCondition>,
    pub ttl: Option<u32>,

    // Relational-only options.
    pub returning: Vec<String>,
    pub on_conflict: Option<OnConflict>,
}

impl QueryIr {
    pub fn select(table: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Select,
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }

    /// True when any projected column is an aggregate expression
    /// (`count(*)`, `sum(amount)`, ...).
    pub fn has_aggregate_columns(&self) -> bool {
        self.columns.iter().any(|c| is_aggregate_expression(c))
    }
}

/// Recognize `fn(arg)` aggregate projections, optionally aliased with
/// `as name`.
pub fn is_aggregate_expression(column: &str) -> bool {
    parse_aggregate_expression(column).is_some()
}

/// Split `"sum(amount) as total"` into `("sum", "amount", "total")`.
/// The alias defaults to `fn_arg` (`aggregate` for `count(*)`).
pub fn parse_aggregate_expression(column: &str) -> Option<(String, String, String)> {
    let (expr, alias) = match column.split_once(" as ") {
        Some((expr, alias)) => (expr.trim(), Some(alias.trim())),
        None => (column.trim(), None),
    };

    let open = expr.find('(')?;
    if !expr.ends_with(')') {
        return None;
    }

    let func = expr[..open].trim().to_ascii_lowercase();
    match func.as_str() {
        "count" | "sum" | "avg" | "min" | "max" => {}
        _ => return None,
    }

    let arg = expr[open + 1..expr.len() - 1].trim().to_string();
    let alias = alias.map(str::to_string).unwrap_or_else(|| {
        if arg == "*" {
            "aggregate".to_string()
        } else {
            format!("{}_{}", func, arg)
        }
    });

    Some((func, arg, alias))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_structurally_independent() {
        let mut original = QueryIr::select("users");
        original.wheres.push(WhereClause::Basic {
            column: "active".to_string(),
            operator: "=".to_string(),
            value: Value::Bool(true),
            connector: Connector::And,
        });

        let mut copy = original.clone();
        copy.wheres.push(WhereClause::Null {
            column: "deleted_at".to_string(),
            connector: Connector::And,
        });
        copy.limit = Some(5);

        assert_eq!(original.wheres.len(), 1);
        assert_eq!(original.limit, None);
        assert_eq!(copy.wheres.len(), 2);
    }

    #[test]
    fn aggregate_expression_parsing() {
        assert_eq!(
            parse_aggregate_expression("count(*)"),
            Some(("count".to_string(), "*".to_string(), "aggregate".to_string()))
        );
        assert_eq!(
            parse_aggregate_expression("sum(amount)"),
            Some(("sum".to_string(), "amount".to_string(), "sum_amount".to_string()))
        );
        assert_eq!(
            parse_aggregate_expression("count(*) as aggregate"),
            Some(("count".to_string(), "*".to_string(), "aggregate".to_string()))
        );
        assert_eq!(parse_aggregate_expression("name"), None);
        assert_eq!(parse_aggregate_expression("lower(name)"), None);
    }
}
