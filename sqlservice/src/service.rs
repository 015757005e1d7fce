//! Generic CRUD service bound to one session per unit of work.
//!
//! A service is either handed a session whose lifecycle belongs to the
//! caller, or opens its own and owns finalization. Write operations record
//! ids for the refresh protocol and mutate the shared [`ResponseStatus`]
//! as a side channel.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::StatusCode;

use crate::db::{Engine, Session, SharedSession};
use crate::entity::{Entity, Relation};
use crate::error::{ServiceError, ServiceResult};
use crate::query::{self, NullMode, QuerySpec};
use crate::response::ResponseStatus;
use crate::result::{Loaded, Related, RelatedSet, ResultSet};
use crate::value::{FieldMap, SqlValue};
use sqlx::postgres::PgRow;
use sqlx::FromRow;

/// Who finalizes the session this service is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Supplied by the caller (per-request injection); the service never
    /// commits or closes it.
    External,
    /// Opened by the service for one scoped unit of work; [`finish`]
    /// commits, refreshes and releases it.
    ///
    /// [`finish`]: EntityService::finish
    Managed,
}

/// Locator for update/delete: a primary key or a filter map.
#[derive(Debug, Clone)]
pub enum Target {
    Id(SqlValue),
    Filter(FieldMap),
}

impl Target {
    fn into_spec<T: Entity>(self) -> QuerySpec {
        match self {
            Target::Id(id) => QuerySpec::new().filter(T::ID, id),
            Target::Filter(filters) => QuerySpec::from_filters(filters),
        }
    }
}

impl From<i32> for Target {
    fn from(id: i32) -> Self {
        Target::Id(id.into())
    }
}

impl From<i64> for Target {
    fn from(id: i64) -> Self {
        Target::Id(id.into())
    }
}

impl From<uuid::Uuid> for Target {
    fn from(id: uuid::Uuid) -> Self {
        Target::Id(id.into())
    }
}

impl From<SqlValue> for Target {
    fn from(id: SqlValue) -> Self {
        Target::Id(id)
    }
}

impl From<FieldMap> for Target {
    fn from(filters: FieldMap) -> Self {
        Target::Filter(filters)
    }
}

/// Generic CRUD service over one entity type.
///
/// Writes inside a managed unit of work stay on the open transaction and
/// become durable at [`finish`]; dropping the service without finishing
/// rolls everything back and returns the connection to the pool.
///
/// [`finish`]: EntityService::finish
pub struct EntityService<T: Entity> {
    session: SharedSession,
    mode: SessionMode,
    response: ResponseStatus,
    refresh_queue: Mutex<Vec<SqlValue>>,
    _entity: PhantomData<T>,
}

impl<T: Entity> EntityService<T> {
    /// Bind to an externally supplied session. The caller finalizes it;
    /// this service will not commit or close it.
    pub fn with_session(session: SharedSession, response: ResponseStatus) -> Self {
        tracing::debug!(table = T::TABLE, mode = "external", "service bound");
        Self {
            session,
            mode: SessionMode::External,
            response,
            refresh_queue: Mutex::new(Vec::new()),
            _entity: PhantomData,
        }
    }

    /// Open a self-managed unit of work on a fresh session.
    pub fn begin(engine: &Engine) -> Self {
        tracing::debug!(table = T::TABLE, mode = "managed", "service bound");
        Self {
            session: engine.open_shared(),
            mode: SessionMode::Managed,
            response: ResponseStatus::new(),
            refresh_queue: Mutex::new(Vec::new()),
            _entity: PhantomData,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The status carrier this service records success statuses on.
    pub fn response(&self) -> ResponseStatus {
        self.response.clone()
    }

    /// The bound session, for composed queries outside the CRUD surface.
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    /// Count rows matching the spec's filters.
    pub async fn count(&self, spec: &QuerySpec) -> ServiceResult<i64> {
        let mut qb = query::count::<T>(spec)?;
        let mut session = self.session.lock().await;
        let conn = session.conn().await?;
        Ok(qb.build_query_scalar::<i64>().fetch_one(conn).await?)
    }

    /// Fetch rows matching the spec, with pagination and eager loads.
    pub async fn get_list(&self, spec: &QuerySpec) -> ServiceResult<ResultSet<T>> {
        let mut qb = query::select::<T>(spec)?;
        let mut session = self.session.lock().await;
        let conn = session.conn().await?;
        let rows = qb.build().fetch_all(conn).await?;
        let related = load_related::<T>(&mut session, spec, &rows).await?;
        Ok(ResultSet::new(rows, related))
    }

    /// Locate one row by the spec's filters, `None` when absent.
    pub async fn find_one(&self, spec: &QuerySpec) -> ServiceResult<Option<Loaded<T>>> {
        let mut qb = query::select_one::<T>(spec)?;
        let mut session = self.session.lock().await;
        let conn = session.conn().await?;
        let Some(row) = qb.build().fetch_optional(conn).await? else {
            return Ok(None);
        };
        let entity = T::from_row(&row)?;
        let related = load_related::<T>(&mut session, spec, std::slice::from_ref(&row)).await?;
        Ok(Some(Loaded { entity, related }))
    }

    /// Locate one row by the spec's filters; absence is a not-found error.
    pub async fn get_one(&self, spec: &QuerySpec) -> ServiceResult<Loaded<T>> {
        self.find_one(spec)
            .await?
            .ok_or(ServiceError::NotFound { detail: None })
    }

    /// Insert a new row from the field map and record status 201.
    pub async fn create(&self, fields: FieldMap) -> ServiceResult<T> {
        let mut qb = query::insert::<T>(&fields)?;
        let entity = {
            let mut session = self.session.lock().await;
            let conn = session.conn().await?;
            qb.build_query_as::<T>()
                .fetch_one(conn)
                .await
                .map_err(ServiceError::from_db)?
        };
        self.queue_refresh(entity.id());
        self.response.set(StatusCode::CREATED);
        Ok(entity)
    }

    /// Insert a new row stamped with creator and editor identity.
    pub async fn create_by(
        &self,
        fields: FieldMap,
        actor: impl Into<SqlValue>,
    ) -> ServiceResult<T> {
        let actor = actor.into();
        let fields = fields
            .set("creator_id", actor.clone())
            .set("editor_id", actor);
        self.create(fields).await
    }

    /// Locate one row and assign the patch fields to it.
    ///
    /// Unset patch values are skipped under [`NullMode::Skip`]. Old and
    /// new values are compared through the field registry; when nothing
    /// actually changed, status 304 is recorded and the stored row is
    /// untouched in substance.
    pub async fn update(
        &self,
        target: impl Into<Target>,
        patch: FieldMap,
        nulls: NullMode,
    ) -> ServiceResult<T> {
        let spec = target.into().into_spec::<T>();
        let current = self.get_one(&spec).await?.into_inner();

        let mut fields = FieldMap::new();
        let mut modified = false;
        for (field, value) in patch.iter() {
            if value.is_null() && nulls == NullMode::Skip {
                continue;
            }
            let old = current
                .get(field)
                .ok_or_else(|| ServiceError::UnknownColumn {
                    column: field.clone(),
                })?;
            if old != *value {
                modified = true;
            }
            fields.insert(field.clone(), value.clone());
        }

        if fields.is_empty() {
            self.response.set(StatusCode::NOT_MODIFIED);
            return Ok(current);
        }

        let mut qb = query::update_by_id::<T>(&current.id(), &fields)?;
        let entity = {
            let mut session = self.session.lock().await;
            let conn = session.conn().await?;
            qb.build_query_as::<T>()
                .fetch_one(conn)
                .await
                .map_err(ServiceError::from_db)?
        };
        self.queue_refresh(entity.id());
        if !modified {
            self.response.set(StatusCode::NOT_MODIFIED);
        }
        Ok(entity)
    }

    /// Locate one row and delete it, recording status 204. Absence is a
    /// not-found error.
    pub async fn delete(&self, target: impl Into<Target>) -> ServiceResult<()> {
        let spec = target.into().into_spec::<T>();
        let current = self.get_one(&spec).await?;
        let mut qb = query::delete_by_id::<T>(&current.id())?;
        {
            let mut session = self.session.lock().await;
            let conn = session.conn().await?;
            qb.build()
                .execute(conn)
                .await
                .map_err(ServiceError::from_db)?;
        }
        self.response.set(StatusCode::NO_CONTENT);
        Ok(())
    }

    /// Re-read every entity written during this unit of work and return
    /// the fresh copies, clearing the queue. Statements execute eagerly,
    /// so database-generated values are already visible to the re-read
    /// inside the open transaction.
    pub async fn refresh(&self) -> ServiceResult<Vec<T>> {
        let queued = std::mem::take(&mut *self.queue());
        if queued.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = queued.len(), "refreshing written entities");

        let mut session = self.session.lock().await;
        let mut fresh = Vec::with_capacity(queued.len());
        for id in queued {
            let mut qb = query::select_by_id::<T>(&id)?;
            let conn = session.conn().await?;
            if let Some(entity) = qb.build_query_as::<T>().fetch_optional(conn).await? {
                fresh.push(entity);
            }
        }
        Ok(fresh)
    }

    /// Finalize the unit of work: commit, classify integrity failures,
    /// refresh, release.
    ///
    /// For an externally supplied session this is a no-op; its owner
    /// finalizes. For a managed session a failed commit rolls back and
    /// surfaces the classified domain error; there are no retries.
    pub async fn finish(self) -> ServiceResult<()> {
        if self.mode == SessionMode::External {
            tracing::debug!("external session, finalization left to its owner");
            return Ok(());
        }

        {
            let mut session = self.session.lock().await;
            if let Err(error) = session.commit().await {
                tracing::warn!("commit failed, rolling back");
                session.rollback().await;
                return Err(ServiceError::from_db(error));
            }
        }
        self.refresh().await?;
        Ok(())
    }

    fn queue_refresh(&self, id: SqlValue) {
        self.queue().push(id);
    }

    fn queue(&self) -> MutexGuard<'_, Vec<SqlValue>> {
        self.refresh_queue
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

/// Run the spec's eager-load directives against the fetched rows: one
/// IN-list query per directive, child relations keyed off the parent
/// relation's rows.
async fn load_related<T: Entity>(
    session: &mut Session,
    spec: &QuerySpec,
    rows: &[PgRow],
) -> ServiceResult<Related> {
    let mut related = Related::default();
    if spec.loads().is_empty() || rows.is_empty() {
        return Ok(related);
    }

    for directive in query::normalize_loads(spec.loads()) {
        let relation = find_relation(T::relations(), directive.parent)?;
        let keys = decode_keys(rows, relation.local_key)?;
        let parent_rows = fetch_relation(session, relation, &keys).await?;

        for child_name in &directive.children {
            let child = find_relation(relation.children, child_name)?;
            let child_keys = decode_keys(&parent_rows, child.local_key)?;
            let child_rows = fetch_relation(session, child, &child_keys).await?;
            related.insert(
                format!("{}.{}", relation.name, child.name),
                RelatedSet {
                    foreign_key: child.foreign_key,
                    rows: child_rows,
                },
            );
        }

        related.insert(
            relation.name.to_string(),
            RelatedSet {
                foreign_key: relation.foreign_key,
                rows: parent_rows,
            },
        );
    }
    Ok(related)
}

async fn fetch_relation(
    session: &mut Session,
    relation: &Relation,
    keys: &[SqlValue],
) -> ServiceResult<Vec<PgRow>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = query::relation_rows(relation, keys)?;
    let conn = session.conn().await?;
    Ok(qb.build().fetch_all(conn).await?)
}

fn find_relation<'a>(relations: &'a [Relation], name: &str) -> ServiceResult<&'a Relation> {
    relations
        .iter()
        .find(|relation| relation.name == name)
        .ok_or_else(|| ServiceError::UnknownRelation {
            name: name.to_string(),
        })
}

/// Distinct non-null key values of one column across the fetched rows.
fn decode_keys(rows: &[PgRow], column: &str) -> ServiceResult<Vec<SqlValue>> {
    let mut keys = Vec::new();
    for row in rows {
        let value = SqlValue::decode(row, column)?;
        if value.is_null() || keys.contains(&value) {
            continue;
        }
        keys.push(value);
    }
    Ok(keys)
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
    fn id_target_filters_on_the_id_column() {
        let spec = Target::from(7).into_spec::<TestUser>();
        let qb = query::select_one::<TestUser>(&spec).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"id\" = $1 ORDER BY \"id\""
        );
    }

    #[test]
    fn filter_target_uses_the_map() {
        let spec = Target::from(FieldMap::new().set("name", "test")).into_spec::<TestUser>();
        let qb = query::select_one::<TestUser>(&spec).expect("query");
        assert_eq!(
            qb.sql(),
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"name\" = $1 ORDER BY \"id\""
        );
    }

    #[test]
    fn unknown_relations_are_rejected() {
        let err = find_relation(TestUser::relations(), "orders").unwrap_err();
        assert!(matches!(err, ServiceError::UnknownRelation { name } if name == "orders"));
    }
}
