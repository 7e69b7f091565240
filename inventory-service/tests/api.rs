mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{cart, product, Harness};
use inventory_service::api::{create_router, AppState};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

async fn get(h: &Harness, uri: &str) -> (StatusCode, Value) {
    let app = create_router(AppState { inventory: h.inventory.clone() });
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

#[tokio::test]
async fn health_check_responds_ok() {
    let h = Harness::new([product(1, 0)]);
    let (status, body) = get(&h, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn availability_reflects_active_holds() {
    let a = product(10, 5);
    let h = Harness::new([a.clone()]);
    h.inventory.reservations.reserve(a.id, 6, &cart("1"), None).await.unwrap();

    let (status, body) = get(&h, &format!("/products/{}/availability?quantity=5", a.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(body["available_stock"], 4);
    assert_eq!(body["shortfall"], 1);
    assert_eq!(body["is_low_stock"], true);
    assert_eq!(body["reason"], "INSUFFICIENT_STOCK");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let a = product(10, 5);
    let h = Harness::new([a.clone()]);

    let (status, body) = get(&h, &format!("/products/{}/availability?quantity=0", a.id)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "VALIDATION");

    let (status, body) = get(&h, &format!("/products/{}/movements", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn stats_movements_and_low_stock_listing() {
    let a = product(6, 5);
    let h = Harness::new([a.clone()]);
    h.inventory.stock.decrease(a.id, 2, "sale", None).await.unwrap();
    h.inventory.reservations.reserve(a.id, 1, &cart("1"), None).await.unwrap();

    let (_, stats) = get(&h, "/stats").await;
    assert_eq!(stats["total_active"], 1);

    let (_, movements) = get(&h, &format!("/products/{}/movements?limit=5", a.id)).await;
    assert_eq!(movements.as_array().map(Vec::len), Some(1));
    assert_eq!(movements[0]["movement_type"], "OUT");

    let (_, low) = get(&h, "/low-stock").await;
    assert_eq!(low[0]["id"], a.id.to_string());
}
