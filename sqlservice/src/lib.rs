//! Generic CRUD service layer over sqlx.
//!
//! Binds a service to one database session per unit of work, builds
//! filtered/paginated/eager-loading queries from immutable specifications,
//! and maps outcomes to HTTP-style status codes for axum handlers.
//!
//! # Example
//!
//! ```ignore
//! use sqlservice::{Engine, EntityService, FieldMap, QuerySpec};
//!
//! let engine = Engine::from_env().await?;
//! let svc = EntityService::<User>::begin(&engine);
//! let user = svc.create(FieldMap::new().set("name", "Ivan")).await?;
//! let found = svc.get_one(&QuerySpec::new().filter("id", user.id())).await?;
//! svc.finish().await?;
//! ```

pub mod db;
pub mod entity;
pub mod error;
pub mod query;
pub mod response;
pub mod result;
pub mod service;
pub mod value;

pub use db::{ensure_database, Engine, Session, SharedSession};
pub use entity::{Entity, Relation};
pub use error::{ServiceError, ServiceResult};
pub use query::{Load, NullMode, QuerySpec, DEFAULT_PER_PAGE};
pub use response::ResponseStatus;
pub use result::{Loaded, Related, ResultSet};
pub use service::{EntityService, SessionMode, Target};
pub use value::{FieldMap, SqlValue};

pub use sqlservice_core::{load_dotenv, DbSettings, Dialect};
