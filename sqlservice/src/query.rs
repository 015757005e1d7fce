//! Query construction from immutable query specifications.
//!
//! Everything here is a pure function from a [`QuerySpec`] to an
//! `sqlx::QueryBuilder`; execution stays with the session. Filters compose
//! as AND, identifiers are validated and quoted, and list queries order by
//! the primary key so pagination windows are deterministic.

use sqlx::{Postgres, QueryBuilder};

use crate::entity::{Entity, Relation};
use crate::error::ServiceError;
use crate::value::{FieldMap, SqlValue};

/// Page size applied when only a page index is supplied.
pub const DEFAULT_PER_PAGE: i64 = 20;

/// How unset (`Null`) values behave in filters and update payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NullMode {
    /// Drop fields whose value is unset.
    #[default]
    Skip,
    /// Treat unset as a literal value: `IS NULL` in filters, assignment of
    /// NULL in updates.
    AsValue,
}

/// Eager-load directive: a relation attribute, optionally with child
/// relations loaded one level beneath it.
#[derive(Debug, Clone)]
pub enum Load {
    One(&'static str),
    Nested {
        parent: &'static str,
        children: Vec<&'static str>,
    },
}

/// Normalized form: one directive per requested entry.
#[derive(Debug, Clone)]
pub(crate) struct LoadDirective {
    pub parent: &'static str,
    pub children: Vec<&'static str>,
}

pub(crate) fn normalize_loads(loads: &[Load]) -> Vec<LoadDirective> {
    loads
        .iter()
        .map(|load| match load {
            Load::One(name) => LoadDirective {
                parent: name,
                children: Vec::new(),
            },
            Load::Nested { parent, children } => LoadDirective {
                parent,
                children: children.clone(),
            },
        })
        .collect()
}

/// Immutable descriptor of one query: equality filters, like filters,
/// null handling, pagination and eager-load directives.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    filters: FieldMap,
    likes: Vec<(String, SqlValue)>,
    nulls: NullMode,
    page: Option<i64>,
    per_page: Option<i64>,
    loads: Vec<Load>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing filter map.
    pub fn from_filters(filters: FieldMap) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Add an equality filter. `Null` values follow the spec's
    /// [`NullMode`].
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filters.insert(field, value);
        self
    }

    /// Add a case-sensitive substring filter (`LIKE '%value%'`). Unset
    /// values are always skipped.
    pub fn like(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.likes.push((field.into(), value.into()));
        self
    }

    pub fn nulls(mut self, mode: NullMode) -> Self {
        self.nulls = mode;
        self
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn per_page(mut self, per_page: i64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Eager-load a relation.
    pub fn load(mut self, relation: &'static str) -> Self {
        self.loads.push(Load::One(relation));
        self
    }

    /// Eager-load a relation and child relations beneath it.
    pub fn load_nested(mut self, parent: &'static str, children: &[&'static str]) -> Self {
        self.loads.push(Load::Nested {
            parent,
            children: children.to_vec(),
        });
        self
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }
}

/// Validate and double-quote a SQL identifier.
pub fn quote_ident(name: &str) -> Result<String, ServiceError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(ServiceError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{name}\""))
}

fn column_list<T: Entity>() -> Result<String, ServiceError> {
    let mut columns = Vec::with_capacity(T::COLUMNS.len());
    for column in T::COLUMNS {
        columns.push(quote_ident(column)?);
    }
    Ok(columns.join(", "))
}

/// Pagination window. Applied only when at least one of page/per_page is
/// given; the missing half defaults to page 0 / [`DEFAULT_PER_PAGE`].
pub(crate) fn page_window(page: Option<i64>, per_page: Option<i64>) -> Option<(i64, i64)> {
    if page.is_none() && per_page.is_none() {
        return None;
    }
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
    let offset = page.unwrap_or(0) * per_page;
    Some((offset, per_page))
}

fn push_predicates(
    qb: &mut QueryBuilder<'static, Postgres>,
    spec: &QuerySpec,
) -> Result<(), ServiceError> {
    let mut prefix = " WHERE ";
    for (field, value) in spec.filters.iter() {
        match (value, spec.nulls) {
            (SqlValue::Null, NullMode::Skip) => continue,
            (SqlValue::Null, NullMode::AsValue) => {
                qb.push(prefix);
                qb.push(quote_ident(field)?);
                qb.push(" IS NULL");
            }
            (value, _) => {
                qb.push(prefix);
                qb.push(quote_ident(field)?);
                qb.push(" = ");
                value.push_to(qb);
            }
        }
        prefix = " AND ";
    }
    for (field, value) in &spec.likes {
        if value.is_null() {
            continue;
        }
        qb.push(prefix);
        qb.push(quote_ident(field)?);
        qb.push(" LIKE ");
        qb.push_bind(format!("%{value}%"));
        prefix = " AND ";
    }
    Ok(())
}

/// Count rows matching the spec's filters.
pub fn count<T: Entity>(spec: &QuerySpec) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("SELECT count(*) FROM ");
    qb.push(quote_ident(T::TABLE)?);
    push_predicates(&mut qb, spec)?;
    Ok(qb)
}

/// Select rows matching the spec, ordered by id, with the pagination
/// window applied when requested.
pub fn select<T: Entity>(spec: &QuerySpec) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = select_one::<T>(spec)?;
    if let Some((offset, limit)) = page_window(spec.page, spec.per_page) {
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
    }
    Ok(qb)
}

/// Select matching rows without pagination; used to locate single records.
pub fn select_one<T: Entity>(
    spec: &QuerySpec,
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(column_list::<T>()?);
    qb.push(" FROM ");
    qb.push(quote_ident(T::TABLE)?);
    push_predicates(&mut qb, spec)?;
    qb.push(" ORDER BY ");
    qb.push(quote_ident(T::ID)?);
    Ok(qb)
}

/// Insert from a field map, returning the created row.
pub fn insert<T: Entity>(
    fields: &FieldMap,
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("INSERT INTO ");
    qb.push(quote_ident(T::TABLE)?);
    if fields.is_empty() {
        qb.push(" DEFAULT VALUES");
    } else {
        qb.push(" (");
        for (i, (field, _)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote_ident(field)?);
        }
        qb.push(") VALUES (");
        for (i, (_, value)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            value.push_to(&mut qb);
        }
        qb.push(")");
    }
    qb.push(" RETURNING ");
    qb.push(column_list::<T>()?);
    Ok(qb)
}

/// Update one row by id, returning the new values.
pub fn update_by_id<T: Entity>(
    id: &SqlValue,
    fields: &FieldMap,
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("UPDATE ");
    qb.push(quote_ident(T::TABLE)?);
    qb.push(" SET ");
    for (i, (field, value)) in fields.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(quote_ident(field)?);
        qb.push(" = ");
        value.push_to(&mut qb);
    }
    qb.push(" WHERE ");
    qb.push(quote_ident(T::ID)?);
    qb.push(" = ");
    id.push_to(&mut qb);
    qb.push(" RETURNING ");
    qb.push(column_list::<T>()?);
    Ok(qb)
}

/// Delete one row by id.
pub fn delete_by_id<T: Entity>(
    id: &SqlValue,
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("DELETE FROM ");
    qb.push(quote_ident(T::TABLE)?);
    qb.push(" WHERE ");
    qb.push(quote_ident(T::ID)?);
    qb.push(" = ");
    id.push_to(&mut qb);
    Ok(qb)
}

/// Select one row by id, used by the refresh protocol.
pub fn select_by_id<T: Entity>(
    id: &SqlValue,
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(column_list::<T>()?);
    qb.push(" FROM ");
    qb.push(quote_ident(T::TABLE)?);
    qb.push(" WHERE ");
    qb.push(quote_ident(T::ID)?);
    qb.push(" = ");
    id.push_to(&mut qb);
    Ok(qb)
}

/// Select related rows whose foreign key is in `keys`. One such query runs
/// per eager-load directive; callers guarantee `keys` is non-empty.
pub fn relation_rows(
    relation: &Relation,
    keys: &[SqlValue],
) -> Result<QueryBuilder<'static, Postgres>, ServiceError> {
    let mut qb = QueryBuilder::new("SELECT * FROM ");
    qb.push(quote_ident(relation.table)?);
    qb.push(" WHERE ");
    qb.push(quote_ident(relation.foreign_key)?);
    qb.push(" IN (");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        key.push_to(&mut qb);
    }
    qb.push(")");
    Ok(qb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, sqlx::FromRow)]
    struct TestUser {
        id: i32,
        name: String,
    }

    impl Entity for TestUser {
        const TABLE: &'static str = "users";
        const COLUMNS: &'static [&'static str] = &["id", "name"];

        fn id(&self) -> SqlValue {
            self.id.into()
        }

        fn get(&self, column: &str) -> Option<SqlValue> {
            match column {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.clone().into()),
                _ => None,
            }
        }
    }

    #[test]
    fn count_without_filters() {
        let qb = count::<TestUser>(&QuerySpec::new()).expect("query");
        assert_eq!(qb.sql(), "SELECT count(*) FROM \"users\"");
    }

    #[test]
    fn filters_compose_as_and() {
        let spec = QuerySpec::new().filter("name", "test").filter("id", 1);
        let qb = count::<TestUser>(&spec).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT count(*) FROM \"users\" WHERE \"name\" = $1 AND \"id\" = $2"
        );
    }

    #[test]
    fn null_filters_are_skipped_by_default() {
        let spec = QuerySpec::new()
            .filter("name", SqlValue::Null)
            .filter("id", 1);
        let qb = count::<TestUser>(&spec).expect("query");
        assert_eq!(qb.sql(), "SELECT count(*) FROM \"users\" WHERE \"id\" = $1");
    }

    #[test]
    fn null_as_value_renders_is_null() {
        let spec = QuerySpec::new()
            .filter("name", SqlValue::Null)
            .nulls(NullMode::AsValue);
        let qb = count::<TestUser>(&spec).expect("query");
        assert_eq!(qb.sql(), "SELECT count(*) FROM \"users\" WHERE \"name\" IS NULL");
    }

    #[test]
    fn like_filters_bind_wrapped_patterns() {
        let spec = QuerySpec::new()
            .like("name", "1")
            .like("name", SqlValue::Null);
        let qb = select_one::<TestUser>(&spec).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"name\" LIKE $1 ORDER BY \"id\""
        );
    }

    #[test]
    fn select_without_pagination_has_no_window() {
        let qb = select::<TestUser>(&QuerySpec::new()).expect("query");
        assert_eq!(qb.sql(), "SELECT \"id\", \"name\" FROM \"users\" ORDER BY \"id\"");
    }

    #[test]
    fn select_with_pagination_appends_window() {
        let spec = QuerySpec::new().page(2).per_page(10);
        let qb = select::<TestUser>(&spec).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"name\" FROM \"users\" ORDER BY \"id\" LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn page_window_defaults() {
        assert_eq!(page_window(None, None), None);
        assert_eq!(page_window(Some(2), None), Some((2 * DEFAULT_PER_PAGE, DEFAULT_PER_PAGE)));
        assert_eq!(page_window(None, Some(5)), Some((0, 5)));
        assert_eq!(page_window(Some(3), Some(25)), Some((75, 25)));
    }

    #[test]
    fn insert_from_fields() {
        let fields = FieldMap::new().set("name", "Ivan");
        let qb = insert::<TestUser>(&fields).expect("query");
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"users\" (\"name\") VALUES ($1) RETURNING \"id\", \"name\""
        );
    }

    #[test]
    fn insert_from_empty_fields_uses_defaults() {
        let qb = insert::<TestUser>(&FieldMap::new()).expect("query");
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"users\" DEFAULT VALUES RETURNING \"id\", \"name\""
        );
    }

    #[test]
    fn insert_null_field_renders_literal() {
        let fields = FieldMap::new().set("name", SqlValue::Null);
        let qb = insert::<TestUser>(&fields).expect("query");
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"users\" (\"name\") VALUES (NULL) RETURNING \"id\", \"name\""
        );
    }

    #[test]
    fn update_by_id_sets_and_returns() {
        let fields = FieldMap::new().set("name", "after");
        let qb = update_by_id::<TestUser>(&SqlValue::Int(7), &fields).expect("query");
        assert_eq!(
            qb.sql(),
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2 RETURNING \"id\", \"name\""
        );
    }

    #[test]
    fn delete_by_id_targets_one_row() {
        let qb = delete_by_id::<TestUser>(&SqlValue::Int(7)).expect("query");
        assert_eq!(qb.sql(), "DELETE FROM \"users\" WHERE \"id\" = $1");
    }

    #[test]
    fn relation_rows_use_an_in_list() {
        let relation = Relation {
            name: "orders",
            table: "orders",
            local_key: "id",
            foreign_key: "user_id",
            children: &[],
        };
        let keys = [SqlValue::Int(1), SqlValue::Int(2)];
        let qb = relation_rows(&relation, &keys).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT * FROM \"orders\" WHERE \"user_id\" IN ($1, $2)"
        );
    }

    #[test]
    fn quote_ident_rejects_unsafe_names() {
        assert!(quote_ident("users").is_ok());
        assert!(quote_ident("user_names2").is_ok());
        assert!(quote_ident("_private").is_ok());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("2fast").is_err());
        assert!(quote_ident("users; DROP TABLE users").is_err());
        assert!(quote_ident("na\"me").is_err());
    }

    #[test]
    fn load_normalization_produces_one_directive_per_entry() {
        let spec = QuerySpec::new()
            .load("orders")
            .load_nested("orders", &["items"]);
        let directives = normalize_loads(spec.loads());
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].parent, "orders");
        assert!(directives[0].children.is_empty());
        assert_eq!(directives[1].children, vec!["items"]);
    }
}
