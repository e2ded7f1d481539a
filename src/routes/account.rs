use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use super::AppState;
use crate::auth::{self, Auth};
use crate::error::ApiError;
use crate::models::{NewUser, UserProfile};
use crate::repo::RepoError;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignupResponse {
    pub message: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Invalid email or weak password"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many signups from this client")
    ),
    tag = "auth"
)]
pub async fn signup(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    ApiError::check_limit(data.limits.signup(&data.limits.client_ip(&req)))?;
    let body = payload.into_inner();
    let email = trimmed(body.email)
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ApiError::validation("email and password are required"))?;
    let password = body.password.ok_or_else(|| ApiError::validation("email and password are required"))?;
    if !auth::is_valid_email(&email) {
        return Err(ApiError::validation("invalid email address"));
    }
    if let Some(problem) = auth::password_problem(&password) {
        return Err(ApiError::validation(problem));
    }
    let password_hash = auth::hash_password(&password)?;
    let user = data
        .repo
        .create_user(NewUser {
            email,
            password_hash,
            name: trimmed(body.name),
            business_name: trimmed(body.business_name),
            phone: trimmed(body.phone),
        })
        .await
        .map_err(|e| match e {
            RepoError::Conflict(_) => ApiError::Conflict("email already registered".into()),
            other => other.into(),
        })?;
    info!(user_id = user.id, "account created");
    Ok(HttpResponse::Created().json(SignupResponse { message: "account created".into(), user: user.into() }))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    ApiError::check_limit(data.limits.login(&data.limits.client_ip(&req)))?;
    let body = payload.into_inner();
    let user = match data.repo.find_user_by_email(body.email.trim()).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };
    if !auth::verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    let token = auth::create_jwt(user.id, &user.email)?;
    Ok(HttpResponse::Ok().json(LoginResponse { token, user: user.into() }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id).await.map_err(|e| match e {
        RepoError::NotFound => ApiError::Unauthorized,
        other => other.into(),
    })?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}
