//! Recipient endpoints. No session; the token in the path is the credential.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{request_meta, AppState};
use crate::error::ApiError;
use crate::models::PublicOrder;
use crate::orders as service;

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicOrderResponse {
    pub order: PublicOrder,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verification_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RespondRequest {
    /// ACCEPTED, REJECTED or REVIEWING.
    pub response: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

#[utoipa::path(
    get,
    path = "/api/public/orders/{token}",
    params(("token" = String, Path, description = "Public order token")),
    responses(
        (status = 200, description = "Order as shown to the recipient", body = PublicOrderResponse),
        (status = 404, description = "Unknown, draft or cancelled order"),
        (status = 410, description = "Link expired")
    ),
    tag = "public"
)]
pub async fn get_public_order(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let order = service::public_order(data.repo.as_ref(), &path.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(PublicOrderResponse { order }))
}

#[utoipa::path(
    post,
    path = "/api/public/orders/{token}",
    params(("token" = String, Path, description = "Public order token")),
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = ActionResponse),
        (status = 400, description = "Code missing"),
        (status = 401, description = "Code does not match"),
        (status = 404, description = "Unknown, draft or cancelled order"),
        (status = 410, description = "Link expired"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "public"
)]
pub async fn verify(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    ApiError::check_limit(data.limits.verify(&data.limits.client_ip(&req)))?;
    service::verify_recipient(
        data.repo.as_ref(),
        &path.into_inner(),
        payload.into_inner().verification_code,
        request_meta(&req, &data.limits),
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ActionResponse { success: true, message: "verified".into() }))
}

#[utoipa::path(
    put,
    path = "/api/public/orders/{token}",
    params(("token" = String, Path, description = "Public order token")),
    request_body = RespondRequest,
    responses(
        (status = 200, description = "Response recorded", body = ActionResponse),
        (status = 400, description = "Invalid response value"),
        (status = 404, description = "Unknown, draft or cancelled order"),
        (status = 409, description = "Order already processed"),
        (status = 410, description = "Link expired"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "public"
)]
pub async fn respond(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<RespondRequest>,
) -> Result<HttpResponse, ApiError> {
    ApiError::check_limit(data.limits.verify(&data.limits.client_ip(&req)))?;
    let body = payload.into_inner();
    let view = service::respond(
        data.repo.as_ref(),
        &path.into_inner(),
        body.response,
        body.reason,
        request_meta(&req, &data.limits),
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ActionResponse {
        success: true,
        message: service::response_message(view.order.status).into(),
    }))
}
