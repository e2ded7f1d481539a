//! Saved addresses, saved destinations and the recent-item suggestions.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{search_term, AppState, MessageResponse};
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::{AddressInput, DestinationInput, Id, RecentItem, SavedAddress, SavedDestination};

const RECENT_ITEMS_LIMIT: u32 = 20;

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// Case-insensitive substring filter.
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub nickname: Option<String>,
    pub address: Option<String>,
    pub address_detail: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRequest {
    pub nickname: Option<String>,
    pub business_name: Option<String>,
    pub business_number: Option<String>,
    pub contact_name: Option<String>,
    pub phone1: Option<String>,
    pub phone2: Option<String>,
    pub address: Option<String>,
    pub address_detail: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

fn opt(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required(v: Option<String>) -> Result<String, ApiError> {
    opt(v).ok_or_else(|| ApiError::validation("please fill in all required fields"))
}

impl AddressRequest {
    fn validate(self) -> Result<AddressInput, ApiError> {
        Ok(AddressInput {
            nickname: required(self.nickname)?,
            address: required(self.address)?,
            address_detail: opt(self.address_detail),
            is_default: self.is_default,
        })
    }
}

impl DestinationRequest {
    fn validate(self) -> Result<DestinationInput, ApiError> {
        Ok(DestinationInput {
            nickname: required(self.nickname)?,
            business_name: required(self.business_name)?,
            business_number: opt(self.business_number),
            contact_name: required(self.contact_name)?,
            phone1: required(self.phone1)?,
            phone2: opt(self.phone2),
            address: required(self.address)?,
            address_detail: opt(self.address_detail),
            is_default: self.is_default,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddressList {
    pub addresses: Vec<SavedAddress>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddressResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub address: SavedAddress,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DestinationList {
    pub destinations: Vec<SavedDestination>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DestinationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub destination: SavedDestination,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecentItemList {
    pub recent_items: Vec<RecentItem>,
}

// ------------------------------------------------------------ addresses

#[utoipa::path(
    get,
    path = "/api/addresses",
    params(SearchQuery),
    responses((status = 200, description = "Default first, then most used", body = AddressList)),
    tag = "saved"
)]
pub async fn list_addresses(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let addresses = data.repo.list_addresses(auth.user_id, search_term(&query.search)).await?;
    Ok(HttpResponse::Ok().json(AddressList { addresses }))
}

#[utoipa::path(
    post,
    path = "/api/addresses",
    request_body = AddressRequest,
    responses(
        (status = 201, description = "Address saved", body = AddressResponse),
        (status = 400, description = "Missing fields")
    ),
    tag = "saved"
)]
pub async fn create_address(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<AddressRequest>,
) -> Result<HttpResponse, ApiError> {
    let input = payload.into_inner().validate()?;
    let address = data.repo.create_address(auth.user_id, input).await?;
    Ok(HttpResponse::Created().json(AddressResponse { message: Some("address saved".into()), address }))
}

#[utoipa::path(
    get,
    path = "/api/addresses/{id}",
    params(("id" = Id, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address", body = AddressResponse),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn get_address(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let address = data.repo.get_address(auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(AddressResponse { message: None, address }))
}

#[utoipa::path(
    put,
    path = "/api/addresses/{id}",
    params(("id" = Id, Path, description = "Address id")),
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Address replaced", body = AddressResponse),
        (status = 400, description = "Missing fields"),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn update_address(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<AddressRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_address(auth.user_id, id).await?;
    let input = payload.into_inner().validate()?;
    let address = data.repo.update_address(auth.user_id, id, input).await?;
    Ok(HttpResponse::Ok().json(AddressResponse { message: Some("address updated".into()), address }))
}

#[utoipa::path(
    delete,
    path = "/api/addresses/{id}",
    params(("id" = Id, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address deleted", body = MessageResponse),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn delete_address(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.repo.delete_address(auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("address deleted")))
}

// --------------------------------------------------------- destinations

#[utoipa::path(
    get,
    path = "/api/destinations",
    params(SearchQuery),
    responses((status = 200, description = "Default first, then most used", body = DestinationList)),
    tag = "saved"
)]
pub async fn list_destinations(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let destinations = data.repo.list_destinations(auth.user_id, search_term(&query.search)).await?;
    Ok(HttpResponse::Ok().json(DestinationList { destinations }))
}

#[utoipa::path(
    post,
    path = "/api/destinations",
    request_body = DestinationRequest,
    responses(
        (status = 201, description = "Destination saved", body = DestinationResponse),
        (status = 400, description = "Missing fields")
    ),
    tag = "saved"
)]
pub async fn create_destination(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<DestinationRequest>,
) -> Result<HttpResponse, ApiError> {
    let input = payload.into_inner().validate()?;
    let destination = data.repo.create_destination(auth.user_id, input).await?;
    Ok(HttpResponse::Created().json(DestinationResponse { message: Some("destination saved".into()), destination }))
}

#[utoipa::path(
    get,
    path = "/api/destinations/{id}",
    params(("id" = Id, Path, description = "Destination id")),
    responses(
        (status = 200, description = "Destination", body = DestinationResponse),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn get_destination(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let destination = data.repo.get_destination(auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(DestinationResponse { message: None, destination }))
}

#[utoipa::path(
    put,
    path = "/api/destinations/{id}",
    params(("id" = Id, Path, description = "Destination id")),
    request_body = DestinationRequest,
    responses(
        (status = 200, description = "Destination replaced", body = DestinationResponse),
        (status = 400, description = "Missing fields"),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn update_destination(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<DestinationRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_destination(auth.user_id, id).await?;
    let input = payload.into_inner().validate()?;
    let destination = data.repo.update_destination(auth.user_id, id, input).await?;
    Ok(HttpResponse::Ok().json(DestinationResponse { message: Some("destination updated".into()), destination }))
}

#[utoipa::path(
    delete,
    path = "/api/destinations/{id}",
    params(("id" = Id, Path, description = "Destination id")),
    responses(
        (status = 200, description = "Destination deleted", body = MessageResponse),
        (status = 404, description = "Not found")
    ),
    tag = "saved"
)]
pub async fn delete_destination(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo.delete_destination(auth.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("destination deleted")))
}

// --------------------------------------------------------- recent items

#[utoipa::path(
    get,
    path = "/api/recent-items",
    params(SearchQuery),
    responses((status = 200, description = "Most used items first", body = RecentItemList)),
    tag = "saved"
)]
pub async fn list_recent_items(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let recent_items = data
        .repo
        .list_recent_items(auth.user_id, search_term(&query.search), RECENT_ITEMS_LIMIT)
        .await?;
    Ok(HttpResponse::Ok().json(RecentItemList { recent_items }))
}
