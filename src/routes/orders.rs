use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{AppState, MessageResponse};
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::{Id, OrderDetail, OrderFilter, OrderStatus, OrderView};
use crate::orders::{self as service, CreateOrderRequest, UpdateOrderRequest};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Status name, case-insensitive.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderView>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub order: OrderDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSavedResponse {
    pub message: String,
    pub order: OrderView,
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Caller's orders, newest first", body = OrderListResponse),
        (status = 400, description = "Unknown status filter"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "orders"
)]
pub async fn list_orders(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ListOrdersQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<OrderStatus>()?),
        None => None,
    };
    let filter = OrderFilter {
        status,
        page: q.page.unwrap_or(1).max(1),
        limit: q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    };
    let (orders, total) = data.repo.list_orders(auth.user_id, &filter).await?;
    let pagination = Pagination {
        page: filter.page,
        limit: filter.limit,
        total,
        total_pages: total.div_ceil(u64::from(filter.limit)),
    };
    Ok(HttpResponse::Ok().json(OrderListResponse { orders, pagination }))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderSavedResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Order number collision"),
        (status = 429, description = "Too many orders from this client")
    ),
    tag = "orders"
)]
pub async fn create_order(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    ApiError::check_limit(data.limits.order_create(&data.limits.client_ip(&req)))?;
    let order = service::create_order(data.repo.as_ref(), auth.user_id, payload.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(OrderSavedResponse { message: "order created".into(), order }))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Id, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items and history", body = OrderResponse),
        (status = 404, description = "Not found")
    ),
    tag = "orders"
)]
pub async fn get_order(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let order = data.repo.get_order(auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(OrderResponse { order }))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}",
    params(("id" = Id, Path, description = "Order id")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = OrderSavedResponse),
        (status = 400, description = "Order already sent or invalid change"),
        (status = 404, description = "Not found")
    ),
    tag = "orders"
)]
pub async fn update_order(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    let order = service::update_order(data.repo.as_ref(), auth.user_id, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(OrderSavedResponse { message: "order updated".into(), order }))
}

#[utoipa::path(
    delete,
    path = "/api/orders/{id}",
    params(("id" = Id, Path, description = "Order id")),
    responses(
        (status = 200, description = "Draft deleted or sent order cancelled", body = MessageResponse),
        (status = 404, description = "Not found")
    ),
    tag = "orders"
)]
pub async fn delete_order(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let outcome = service::delete_order(data.repo.as_ref(), auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new(outcome.message())))
}
