//! HTTP route definitions.

mod catalog;
mod health;
mod reservations;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(reservations::routes())
        .merge(catalog::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bookhold_engine::{Book, Coordinator, CoordinatorConfig, MemoryStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> (Router, Coordinator) {
        let store = MemoryStore::new().with_books([
            Book::new("B1", "Dune", "Frank Herbert"),
            Book::new("B2", "Emma", "Jane Austen"),
        ]);
        let coordinator = Coordinator::open(Arc::new(store), CoordinatorConfig::default())
            .await
            .unwrap();
        let router = create_routes().with_state(AppState {
            coordinator: coordinator.clone(),
        });
        (router, coordinator)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _) = app().await;
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn make_conflict_remove_flow() {
        let (router, _) = app().await;

        let (status, made) = call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B1", "user_id": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = made["reservation_id"].as_str().unwrap().to_string();
        assert_eq!(made["message"], format!("Reservation {id} made successfully."));
        assert_eq!(made["reservation"]["user_id"], 42);

        let (status, err) = call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B1", "user_id": "43"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"], "Book already reserved.");

        let (status, viewed) = call(&router, "GET", &format!("/view_reservation/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(viewed["book_id"], "B1");

        let (status, removed) = call(
            &router,
            "POST",
            "/remove_reservation",
            Some(json!({"book_id": "B1", "user_id": "42"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed["message"], "Reservation removed successfully.");

        let (status, _) = call(&router, "GET", &format!("/view_reservation/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn error_statuses() {
        let (router, _) = app().await;

        let (status, err) = call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B1", "user_id": "abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "Invalid user_id.");

        let (status, err) = call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "nope", "user_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "Book not found.");

        call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B2", "user_id": 1})),
        )
        .await;
        let (status, _) = call(
            &router,
            "POST",
            "/remove_reservation",
            Some(json!({"book_id": "B2", "user_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, err) = call(&router, "GET", "/view_reservation/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "Invalid reservation_id.");

        let (status, err) = call(
            &router,
            "POST",
            "/remove_reservation",
            Some(json!({"book_id": "B1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].is_string());
    }

    #[tokio::test]
    async fn update_by_book_and_by_id() {
        let (router, _) = app().await;
        let (_, made) = call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B1", "user_id": 42})),
        )
        .await;
        let id = made["reservation_id"].as_str().unwrap().to_string();

        let (status, updated) = call(
            &router,
            "POST",
            "/update_reservation",
            Some(json!({"book_id": "B1", "user_id": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["message"], "Reservation updated successfully.");

        let (status, moved) = call(
            &router,
            "POST",
            "/update_reservation",
            Some(json!({"reservation_id": id, "new_user_id": "7"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["reservation"]["user_id"], 7);

        let (_, mine) = call(&router, "GET", "/api/users/7/reservations", None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        let (_, theirs) = call(&router, "GET", "/api/users/42/reservations", None).await;
        assert!(theirs.as_array().unwrap().is_empty());

        let (status, _) = call(
            &router,
            "POST",
            "/update_reservation",
            Some(json!({"reservation_id": uuid::Uuid::new_v4().to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listings_reflect_reservations() {
        let (router, _) = app().await;
        call(
            &router,
            "POST",
            "/make_reservation",
            Some(json!({"book_id": "B2", "user_id": 5})),
        )
        .await;

        let (_, books) = call(&router, "GET", "/api/books", None).await;
        assert_eq!(books.as_array().unwrap().len(), 2);

        let (_, available) = call(&router, "GET", "/api/books/available", None).await;
        let available = available.as_array().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0]["book_id"], "B1");

        for uri in ["/api/reservations", "/reservations"] {
            let (status, listed) = call(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(listed.as_array().unwrap().len(), 1);
        }

        let (status, held) = call(&router, "GET", "/api/books/B2/reservation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(held["user_id"], 5);

        let (status, _) = call(&router, "GET", "/api/books/B1/reservation", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reconcile_endpoint_reports() {
        let (router, _) = app().await;
        let (status, report) = call(&router, "POST", "/admin/reconcile?dry_run=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["dry_run"], true);
        assert_eq!(report["projections_repaired"], 0);

        let (status, report) = call(&router, "POST", "/admin/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["dry_run"], false);
    }

    #[tokio::test]
    async fn closed_coordinator_is_500() {
        let (router, coordinator) = app().await;
        coordinator.close().await;

        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "closing");

        let (status, _) = call(&router, "GET", "/api/books", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
