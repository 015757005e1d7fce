//! Entity trait and relation registry.

use sqlx::postgres::PgRow;

use crate::value::SqlValue;

/// Static descriptor for a relation reachable from an entity's table.
///
/// `local_key` names the column on the owning side whose values key the
/// eager load; `foreign_key` names the column on the related table that
/// references it. `children` lists relations loadable one level beneath
/// this one.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub table: &'static str,
    pub local_key: &'static str,
    pub foreign_key: &'static str,
    pub children: &'static [Relation],
}

/// Row-backed record with a schema-described field registry.
///
/// The registry replaces attribute reflection: filters, change tracking and
/// relation loading all go through the declared column names.
///
/// ```ignore
/// #[derive(Debug, Clone, sqlx::FromRow)]
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// impl Entity for User {
///     const TABLE: &'static str = "users";
///     const COLUMNS: &'static [&'static str] = &["id", "name"];
///
///     fn id(&self) -> SqlValue {
///         self.id.into()
///     }
///
///     fn get(&self, column: &str) -> Option<SqlValue> {
///         match column {
///             "id" => Some(self.id.into()),
///             "name" => Some(self.name.clone().into()),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait Entity: for<'r> sqlx::FromRow<'r, PgRow> + Send + Sync + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const ID: &'static str = "id";

    /// Primary key value of this record.
    fn id(&self) -> SqlValue;

    /// Current value of a registered column, `None` for unknown columns.
    fn get(&self, column: &str) -> Option<SqlValue>;

    /// Relations loadable from this entity's table.
    fn relations() -> &'static [Relation] {
        &[]
    }
}
