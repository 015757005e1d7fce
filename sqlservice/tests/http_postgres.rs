//! HTTP round-trip test: axum handlers driving the service layer.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p sqlservice -- --ignored

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceExt;

use sqlservice::{Engine, Entity, EntityService, FieldMap, QuerySpec, ServiceError, SqlValue};

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
struct User {
    id: i32,
    name: String,
}

impl Entity for User {
    const TABLE: &'static str = "http_users";
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

#[derive(serde::Serialize, serde::Deserialize)]
struct UserCreate {
    name: String,
}

async fn create_user(
    State(engine): State<Engine>,
    Json(input): Json<UserCreate>,
) -> Result<Response, ServiceError> {
    let svc = EntityService::<User>::begin(&engine);
    let status = svc.response();
    let user = svc.create(FieldMap::from_serialize(&input)?).await?;
    svc.finish().await?;
    Ok(status.apply(Json(user).into_response()))
}

async fn get_user(
    State(engine): State<Engine>,
    Path(id): Path<i32>,
) -> Result<Response, ServiceError> {
    let svc = EntityService::<User>::begin(&engine);
    let user = svc.get_one(&QuerySpec::new().filter("id", id)).await?;
    let response = Json(user.into_inner()).into_response();
    svc.finish().await?;
    Ok(response)
}

async fn delete_user(
    State(engine): State<Engine>,
    Path(id): Path<i32>,
) -> Result<Response, ServiceError> {
    let svc = EntityService::<User>::begin(&engine);
    let status = svc.response();
    svc.delete(id).await?;
    svc.finish().await?;
    Ok(status.apply(().into_response()))
}

fn app(engine: Engine) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user).delete(delete_user))
        .with_state(engine)
}

#[tokio::test]
#[ignore = "requires database"]
async fn user_lifecycle_over_http() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let engine = Engine::connect(&url).await.expect("pool creation failed");

    sqlx::query("DROP TABLE IF EXISTS http_users")
        .execute(engine.pool())
        .await
        .expect("schema reset failed");
    sqlx::query("CREATE TABLE http_users (id SERIAL PRIMARY KEY, name TEXT NOT NULL)")
        .execute(engine.pool())
        .await
        .expect("schema reset failed");

    let app = app(engine);

    // Create returns the record with status 201.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/users")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name":"Ivan"}"#))
                .expect("request"),
        )
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let user: serde_json::Value = serde_json::from_slice(&body).expect("json");
    let id = user["id"].as_i64().expect("id");
    assert_eq!(user["name"], "Ivan");

    // Fetch it back.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/users/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);

    // Delete responds 204, a later fetch is a JSON 404.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/users/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/users/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["status"], 404);
}
