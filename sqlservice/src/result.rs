//! Lazily decoded result sets and eager-loaded relation rows.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::entity::Entity;
use crate::error::{ServiceError, ServiceResult};
use crate::value::SqlValue;

/// Rows of one eager-loaded relation, keyed for lookup by the foreign key
/// column the load ran against.
#[derive(Debug)]
pub struct RelatedSet {
    pub(crate) foreign_key: &'static str,
    pub(crate) rows: Vec<PgRow>,
}

impl RelatedSet {
    pub fn foreign_key(&self) -> &'static str {
        self.foreign_key
    }

    pub fn rows(&self) -> &[PgRow] {
        &self.rows
    }
}

/// Eager-loaded relation rows grouped by directive path.
///
/// Top-level relations are keyed by their name, child relations by
/// `"parent.child"`.
#[derive(Debug, Default)]
pub struct Related {
    sets: HashMap<String, RelatedSet>,
}

impl Related {
    pub(crate) fn insert(&mut self, path: String, set: RelatedSet) {
        self.sets.insert(path, set);
    }

    /// All loaded rows for a directive path, empty when the path was not
    /// requested.
    pub fn rows(&self, path: &str) -> &[PgRow] {
        self.sets
            .get(path)
            .map(|set| set.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Rows for a directive path belonging to one parent key.
    pub fn rows_for(&self, path: &str, key: &SqlValue) -> Vec<&PgRow> {
        let Some(set) = self.sets.get(path) else {
            return Vec::new();
        };
        set.rows
            .iter()
            .filter(|row| {
                SqlValue::decode(row, set.foreign_key)
                    .map(|value| value == *key)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// An entity together with its eager-loaded relation rows.
///
/// Derefs to the entity, so plain field access keeps working.
#[derive(Debug)]
pub struct Loaded<T> {
    pub entity: T,
    pub related: Related,
}

impl<T> Loaded<T> {
    pub fn into_inner(self) -> T {
        self.entity
    }
}

impl<T> Deref for Loaded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T> DerefMut for Loaded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entity
    }
}

/// Query results positioned at the fetched rows; entities decode on
/// iteration, `all()` materializes the rest.
#[derive(Debug)]
pub struct ResultSet<T: Entity> {
    rows: std::vec::IntoIter<PgRow>,
    related: Related,
    _entity: PhantomData<T>,
}

impl<T: Entity> ResultSet<T> {
    pub(crate) fn new(rows: Vec<PgRow>, related: Related) -> Self {
        Self {
            rows: rows.into_iter(),
            related,
            _entity: PhantomData,
        }
    }

    /// Rows not yet decoded.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.len() == 0
    }

    pub fn related(&self) -> &Related {
        &self.related
    }

    /// Decode every remaining row.
    pub fn all(self) -> ServiceResult<Vec<T>> {
        self.collect()
    }
}

impl<T: Entity> Iterator for ResultSet<T> {
    type Item = ServiceResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|row| T::from_row(&row).map_err(ServiceError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_paths_are_empty() {
        let related = Related::default();
        assert!(related.is_empty());
        assert!(related.rows("orders").is_empty());
        assert!(related.rows_for("orders", &SqlValue::Int(1)).is_empty());
    }
}
