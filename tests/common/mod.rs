#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use orderlink::auth::{create_jwt, hash_password};
use orderlink::holidays::HolidayService;
use orderlink::models::{Id, NewUser};
use orderlink::rate_limit::RateLimits;
use orderlink::repo::inmem::InMemRepo;
use orderlink::repo::UserRepo;
use orderlink::AppState;

pub fn set_secret() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

/// Fresh state over an ephemeral store, default limits, no holiday upstream.
pub fn state() -> (AppState, InMemRepo) {
    state_with_limits(RateLimits::default())
}

pub fn state_with_limits(limits: RateLimits) -> (AppState, InMemRepo) {
    let repo = InMemRepo::new();
    let state = AppState::new(Arc::new(repo.clone()), limits, HolidayService::new(None));
    (state, repo)
}

/// Registers a supplier directly in the store and returns `(id, bearer token)`.
pub async fn supplier(repo: &InMemRepo, email: &str) -> (Id, String) {
    set_secret();
    let user = repo
        .create_user(NewUser {
            email: email.to_string(),
            password_hash: hash_password("passw0rd!").unwrap(),
            name: Some("Park".into()),
            business_name: Some("Park Produce".into()),
            phone: Some("02-555-0101".into()),
        })
        .await
        .unwrap();
    let token = create_jwt(user.id, &user.email).unwrap();
    (user.id, token)
}

/// Socket address for a test client; limits key on it unless a proxy is trusted.
pub fn peer(ip: &str) -> SocketAddr {
    format!("{ip}:40000").parse().unwrap()
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

pub fn order_body(status: &str) -> serde_json::Value {
    serde_json::json!({
        "recipientName": "Kim",
        "recipientBusinessName": "Kim Foods",
        "recipientPhone1": "010-1234-5678",
        "recipientAddress": "1 Market St",
        "deliveryDate": "2030-05-01",
        "deliveryTime": "09:00",
        "memo": "back door",
        "status": status,
        "items": [
            {"itemName": "Cabbage", "itemSpec": "10kg", "quantity": 3, "unit": "box"},
            {"itemName": "Radish", "quantity": 1.5, "unit": "kg"}
        ]
    })
}
