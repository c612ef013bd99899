//! Query compilation
//!
//! Lowers a frozen `Query` into a `Cursor` or a `Statement`. Both targets
//! share the store/index preconditions and the residual filter semantics
//! for fields without a backing index.

use super::aggregate::{MapSpec, Projection, Reduction};
use super::builder::Query;
use super::cursor::Cursor;
use super::errors::{QueryError, QueryResult};
use super::range::{quote_identifier, KeyRange};
use super::statement::{ClientSteps, Finalizer, Statement, ROWID_COLUMN};
use crate::observability::{log_event, Event};
use crate::schema::{SchemaCatalog, StoreSchema};

impl Query {
    /// Compiles into a cursor plan for cursor-capable backends.
    pub fn to_cursor<S>(&self, schema: &S) -> QueryResult<Cursor>
    where
        S: SchemaCatalog + ?Sized,
    {
        let result = compile_cursor(self, schema);
        match &result {
            Ok(cursor) => log_event(
                Event::CursorCompiled,
                &[
                    ("store", &cursor.store),
                    ("index", cursor.index.as_deref().unwrap_or("")),
                    ("filters", &cursor.filters.len().to_string()),
                ],
            ),
            Err(err) => log_rejection(self, "cursor", err),
        }
        result
    }

    /// Compiles into a statement plan for row-oriented backends.
    pub fn to_statement<S>(&self, schema: &S) -> QueryResult<Statement>
    where
        S: SchemaCatalog + ?Sized,
    {
        let result = compile_statement(self, schema);
        match &result {
            Ok(statement) => log_event(
                Event::StatementCompiled,
                &[("store", &statement.store), ("sql", &statement.sql)],
            ),
            Err(err) => log_rejection(self, "statement", err),
        }
        result
    }
}

fn log_rejection(query: &Query, target: &str, err: &QueryError) {
    log_event(
        Event::QueryRejected,
        &[
            ("store", query.store()),
            ("target", target),
            ("code", err.code()),
            ("reason", err.message()),
        ],
    );
}

/// Store must be named and known; an explicit index must exist on it.
fn resolve_store<'s, S>(query: &Query, schema: &'s S) -> QueryResult<&'s StoreSchema>
where
    S: SchemaCatalog + ?Sized,
{
    if query.store.is_empty() {
        return Err(QueryError::invalid_operation("store name not set"));
    }
    let store = schema.store(&query.store).ok_or_else(|| {
        QueryError::invalid_operation(format!("store: {} not found", query.store))
    })?;
    if let Some(index) = &query.index {
        if !store.has_index(index) {
            return Err(QueryError::invalid_operation(format!(
                "index: {} not found in store {}",
                index, store.name
            )));
        }
    }
    Ok(store)
}

fn projection_for(query: &Query) -> QueryResult<Option<Projection>> {
    match &query.map {
        None => Ok(None),
        Some(MapSpec::Select(fields)) => Ok(Some(Projection::from_fields(fields))),
        Some(MapSpec::Expression { expression, .. }) => Err(QueryError::unsupported(format!(
            "map expression '{}' cannot be compiled",
            expression
        ))),
    }
}

fn reduction_for(query: &Query) -> QueryResult<Option<Reduction>> {
    query.reduce.as_ref().map(Reduction::from_spec).transpose()
}

pub(crate) fn compile_cursor<S>(query: &Query, schema: &S) -> QueryResult<Cursor>
where
    S: SchemaCatalog + ?Sized,
{
    let store = resolve_store(query, schema)?;
    let mut residual: Vec<KeyRange> = query.ranges.clone();

    // Explicit index wins; otherwise sniff the first range on an indexed field
    let index = match &query.index {
        Some(name) => store.index(name),
        None => residual.iter().find_map(|r| store.index_on(&r.field)),
    };
    let key_range = index.and_then(|index| {
        residual
            .iter()
            .position(|r| r.field == index.key_path())
            .map(|pos| residual.remove(pos))
    });

    let mut cursor = Cursor::new(store.name.clone());
    cursor.index = index.map(|index| index.name.clone());
    cursor.key_range = key_range;
    // Only an index walk has a default direction
    cursor.direction = match index {
        Some(_) => Some(query.direction.unwrap_or_default()),
        None => query.direction,
    };
    cursor.filters = residual;
    cursor.projection = projection_for(query)?;
    cursor.reduction = reduction_for(query)?;
    cursor.limit = query.limit;
    cursor.offset = query.offset;
    Ok(cursor)
}

pub(crate) fn compile_statement<S>(query: &Query, schema: &S) -> QueryResult<Statement>
where
    S: SchemaCatalog + ?Sized,
{
    if !query.sql.is_empty() {
        return Err(QueryError::NotImplemented(
            "statement text parsing is not implemented".to_string(),
        ));
    }
    let store = resolve_store(query, schema)?;

    let projection = projection_for(query)?;
    let reduction = reduction_for(query)?;
    if projection.is_some() && reduction.is_some() {
        return Err(QueryError::unsupported(
            "map and reduce together cannot be lowered to a statement",
        ));
    }

    let direction = query.direction.unwrap_or_default();
    let distinct = direction.is_unique();

    let (bound_ranges, residual): (Vec<KeyRange>, Vec<KeyRange>) = query
        .ranges
        .iter()
        .cloned()
        .partition(|r| store.index_on(&r.field).is_some());

    // Residual filtering, or an aggregate over a limited window, must see
    // the raw rows before anything is cut or folded.
    let client_side = !residual.is_empty()
        || (reduction.is_some() && (query.limit.is_some() || query.offset.is_some()));

    let mut client = ClientSteps {
        filters: residual,
        projection: projection.clone(),
        ..ClientSteps::default()
    };
    let mut columns = Vec::new();
    let mut aggregate = None;
    let (mut limit, mut offset) = (query.limit, query.offset);

    let select = if client_side {
        client.offset = offset.take();
        client.limit = limit.take();
        client.reduction = reduction;
        select_all(distinct)
    } else if let Some(reduction) = reduction {
        let select = select_aggregate(&reduction, distinct);
        client.finalizer = Some(Finalizer::TakeFirst);
        aggregate = Some(reduction);
        select
    } else if let Some(projection) = &projection {
        columns = match projection {
            Projection::Field(name) => vec![name.clone()],
            Projection::Fields(names) => names.clone(),
        };
        let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        format!(
            "SELECT {}{}",
            if distinct { "DISTINCT " } else { "" },
            quoted.join(", ")
        )
    } else {
        select_all(distinct)
    };

    let mut params = Vec::new();
    let mut clauses = Vec::new();
    for range in &bound_ranges {
        let (clause, values) = range.to_where_clause();
        clauses.push(clause);
        params.extend(values);
    }

    let order_by = query
        .index
        .as_deref()
        .and_then(|name| store.index(name))
        .map(|index| index.key_path().to_string())
        .or_else(|| store.key_path.clone())
        .unwrap_or_else(|| ROWID_COLUMN.to_string());
    let order_column = if order_by == ROWID_COLUMN {
        order_by.clone()
    } else {
        quote_identifier(&order_by)
    };

    let mut sql = format!("{} FROM {}", select, quote_identifier(&store.name));
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(
        " ORDER BY {} {}",
        order_column,
        if direction.is_reverse() { "DESC" } else { "ASC" }
    ));
    match (limit, offset) {
        (Some(l), Some(o)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", l, o)),
        (Some(l), None) => sql.push_str(&format!(" LIMIT {}", l)),
        // SQLite only accepts OFFSET after a LIMIT clause
        (None, Some(o)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", o)),
        (None, None) => {}
    }

    Ok(Statement {
        sql,
        params,
        store: store.name.clone(),
        bound_ranges,
        order_by,
        direction,
        distinct,
        columns,
        aggregate,
        limit,
        offset,
        client,
    })
}

fn select_all(distinct: bool) -> String {
    if distinct {
        "SELECT DISTINCT *".to_string()
    } else {
        "SELECT *".to_string()
    }
}

fn select_aggregate(reduction: &Reduction, distinct: bool) -> String {
    match reduction.field() {
        Some(field) => format!(
            "SELECT {}({}{})",
            reduction.sql_function(),
            if distinct { "DISTINCT " } else { "" },
            quote_identifier(field)
        ),
        None => format!("SELECT {}(*)", reduction.sql_function()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, QueryBuilder};
    use crate::schema::{DatabaseSchema, IndexSchema, StoreSchema};
    use serde_json::json;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new(vec![
            StoreSchema::new("animals")
                .with_key_path("id")
                .with_indexes(["color", "legs"]),
            StoreSchema::new("notes"),
        ])
        .unwrap()
    }

    #[test]
    fn test_sniffs_first_indexed_range() {
        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .filter("name", "=", json!("cat"))
            .unwrap()
            .filter("legs", ">", json!(2))
            .unwrap();
        let cursor = builder.build().to_cursor(&schema()).unwrap();

        assert_eq!(cursor.index.as_deref(), Some("legs"));
        assert_eq!(cursor.key_range.as_ref().unwrap().field, "legs");
        assert_eq!(cursor.filters, vec![KeyRange::only("name", json!("cat"))]);
        assert_eq!(cursor.direction, Some(Direction::Next));
    }

    #[test]
    fn test_no_indexed_range_scans_store() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").filter("name", "=", json!("cat")).unwrap();
        let cursor = builder.build().to_cursor(&schema()).unwrap();
        assert_eq!(cursor.index, None);
        assert_eq!(cursor.key_range, None);
        assert_eq!(cursor.direction, None);
        assert_eq!(cursor.filters.len(), 1);
    }

    #[test]
    fn test_full_scan_keeps_requested_direction() {
        let mut builder = QueryBuilder::new();
        builder.from("notes").reverse(true);
        let cursor = builder.build().to_cursor(&schema()).unwrap();
        assert_eq!(cursor.index, None);
        assert_eq!(cursor.direction, Some(Direction::Prev));
    }

    #[test]
    fn test_index_resolved_through_key_path() {
        let schema = DatabaseSchema::new(vec![StoreSchema::new("posts")
            .with_key_path("id")
            .with_index(IndexSchema::new("by_tag").with_key_path("tag"))])
        .unwrap();

        let mut builder = QueryBuilder::new();
        builder.from("posts").filter("tag", "=", json!("x")).unwrap();
        let query = builder.build();

        let cursor = query.to_cursor(&schema).unwrap();
        assert_eq!(cursor.index.as_deref(), Some("by_tag"));
        assert_eq!(cursor.key_range, Some(KeyRange::only("tag", json!("x"))));
        assert!(cursor.filters.is_empty());

        let statement = query.to_statement(&schema).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"posts\" WHERE \"tag\" = ? ORDER BY \"id\" ASC"
        );

        let mut builder = QueryBuilder::new();
        builder.from("posts").order("by_tag");
        let statement = builder.build().to_statement(&schema).unwrap();
        assert_eq!(statement.order_by, "tag");
    }

    #[test]
    fn test_explicit_index_takes_its_range() {
        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .order("color")
            .filter("legs", "=", json!(4))
            .unwrap()
            .filter("color", "=", json!("red"))
            .unwrap();
        builder.reverse(true);
        let cursor = builder.build().to_cursor(&schema()).unwrap();

        assert_eq!(cursor.index.as_deref(), Some("color"));
        assert_eq!(cursor.key_range, Some(KeyRange::only("color", json!("red"))));
        assert_eq!(cursor.filters, vec![KeyRange::only("legs", json!(4))]);
        assert_eq!(cursor.direction, Some(Direction::Prev));
    }

    #[test]
    fn test_missing_store_is_invalid_operation() {
        let query = QueryBuilder::new().build();
        let err = query.to_cursor(&schema()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperation(_)));

        let mut builder = QueryBuilder::new();
        builder.from("plants");
        let err = builder.build().to_cursor(&schema()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperation(_)));
    }

    #[test]
    fn test_unknown_explicit_index() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").order("horn");
        assert!(matches!(
            builder.build().to_cursor(&schema()),
            Err(QueryError::InvalidOperation(_))
        ));
        assert!(matches!(
            builder.build().to_statement(&schema()),
            Err(QueryError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_map_expression_unsupported() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").map_expression("legs * 2", "legs").unwrap();
        assert!(matches!(
            builder.build().to_cursor(&schema()),
            Err(QueryError::Unsupported(_))
        ));
    }

    #[test]
    fn test_statement_basic() {
        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .filter("color", "=", json!("red"))
            .unwrap()
            .limit(10)
            .unwrap()
            .offset(5);
        let statement = builder.build().to_statement(&schema()).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT * FROM \"animals\" WHERE \"color\" = ? ORDER BY \"id\" ASC LIMIT 10 OFFSET 5"
        );
        assert_eq!(statement.params, vec![json!("red")]);
        assert!(statement.client.filters.is_empty());
    }

    #[test]
    fn test_statement_residual_moves_window_client_side() {
        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .filter("name", ">=", json!("b"))
            .unwrap()
            .limit(3)
            .unwrap();
        let statement = builder.build().to_statement(&schema()).unwrap();

        assert_eq!(statement.sql, "SELECT * FROM \"animals\" ORDER BY \"id\" ASC");
        assert_eq!(statement.client.filters.len(), 1);
        assert_eq!(statement.client.limit, Some(3));
        assert_eq!(statement.limit, None);
    }

    #[test]
    fn test_statement_order_falls_back_to_rowid() {
        let mut builder = QueryBuilder::new();
        builder.from("notes").reverse(true);
        let statement = builder.build().to_statement(&schema()).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM \"notes\" ORDER BY _ROWID_ DESC");
    }

    #[test]
    fn test_statement_distinct_aggregate() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").unique(true).reduce("sum", Some("legs")).unwrap();
        let statement = builder.build().to_statement(&schema()).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT SUM(DISTINCT \"legs\") FROM \"animals\" ORDER BY \"id\" ASC"
        );
        assert_eq!(statement.client.finalizer, Some(Finalizer::TakeFirst));
        assert_eq!(statement.aggregate, Some(Reduction::Sum("legs".into())));
    }

    #[test]
    fn test_statement_select_columns() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").unique(true).map("select", ["color", "legs"]).unwrap();
        let statement = builder.build().to_statement(&schema()).unwrap();
        assert!(statement
            .sql
            .starts_with("SELECT DISTINCT \"color\", \"legs\" FROM \"animals\""));
    }

    #[test]
    fn test_statement_offset_without_limit() {
        let mut builder = QueryBuilder::new();
        builder.from("animals").offset(2);
        let statement = builder.build().to_statement(&schema()).unwrap();
        assert!(statement.sql.ends_with("LIMIT -1 OFFSET 2"));
    }

    #[test]
    fn test_statement_raw_sql_not_implemented() {
        let mut builder = QueryBuilder::from_sql("SELECT * FROM animals");
        builder.from("animals");
        assert!(matches!(
            builder.build().to_statement(&schema()),
            Err(QueryError::NotImplemented(_))
        ));

        // Raised before store checks
        let builder = QueryBuilder::from_sql("SELECT 1");
        assert!(matches!(
            builder.build().to_statement(&schema()),
            Err(QueryError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_statement_map_and_reduce_unsupported() {
        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .map("select", "legs")
            .unwrap()
            .reduce("count", None)
            .unwrap();
        assert!(matches!(
            builder.build().to_statement(&schema()),
            Err(QueryError::Unsupported(_))
        ));
    }
}
