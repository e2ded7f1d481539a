use std::sync::Arc;

use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::error::ApiError;
use crate::holidays::HolidayService;
use crate::orders::RequestMeta;
use crate::rate_limit::RateLimits;
use crate::repo::Repo;
use crate::security::ApiRateLimit;

pub mod account;
pub mod holidays;
pub mod orders;
pub mod public;
pub mod saved;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub limits: RateLimits,
    pub holidays: Arc<HolidayService>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, limits: RateLimits, holidays: HolidayService) -> Self {
        Self { repo, limits, holidays: Arc::new(holidays) }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .route("/healthz", web::get().to(healthz))
        .route("/metrics", web::get().to(crate::telemetry::metrics_endpoint))
        .service(
            web::scope("/api")
                .wrap(ApiRateLimit)
                .service(web::resource("/auth/signup").route(web::post().to(account::signup)))
                .service(web::resource("/auth/login").route(web::post().to(account::login)))
                .service(web::resource("/auth/me").route(web::get().to(account::me)))
                .service(
                    web::resource("/orders")
                        .route(web::get().to(orders::list_orders))
                        .route(web::post().to(orders::create_order)),
                )
                .service(
                    web::resource("/orders/{id}")
                        .route(web::get().to(orders::get_order))
                        .route(web::put().to(orders::update_order))
                        .route(web::delete().to(orders::delete_order)),
                )
                .service(
                    web::resource("/addresses")
                        .route(web::get().to(saved::list_addresses))
                        .route(web::post().to(saved::create_address)),
                )
                .service(
                    web::resource("/addresses/{id}")
                        .route(web::get().to(saved::get_address))
                        .route(web::put().to(saved::update_address))
                        .route(web::delete().to(saved::delete_address)),
                )
                .service(
                    web::resource("/destinations")
                        .route(web::get().to(saved::list_destinations))
                        .route(web::post().to(saved::create_destination)),
                )
                .service(
                    web::resource("/destinations/{id}")
                        .route(web::get().to(saved::get_destination))
                        .route(web::put().to(saved::update_destination))
                        .route(web::delete().to(saved::delete_destination)),
                )
                .service(web::resource("/recent-items").route(web::get().to(saved::list_recent_items)))
                .service(web::resource("/holidays").route(web::get().to(holidays::get_holidays)))
                .service(
                    web::resource("/public/orders/{token}")
                        .route(web::get().to(public::get_public_order))
                        .route(web::post().to(public::verify))
                        .route(web::put().to(public::respond)),
                ),
        );
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation(format!("invalid request body: {err}")).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation(format!("invalid query: {err}")).into()
}

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

pub(crate) fn request_meta(req: &HttpRequest, limits: &RateLimits) -> RequestMeta {
    RequestMeta {
        ip: Some(limits.client_ip(req)),
        user_agent: req
            .headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// `?search=` with blanks treated as absent.
pub(crate) fn search_term(search: &Option<String>) -> Option<&str> {
    search.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
