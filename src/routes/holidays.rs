use actix_web::{web, HttpResponse};
use serde::Deserialize;
use utoipa::IntoParams;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize, IntoParams)]
pub struct HolidayQuery {
    pub year: Option<String>,
    /// 1-12; omitted means the whole year.
    pub month: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/holidays",
    params(HolidayQuery),
    responses(
        (status = 200, description = "Holidays keyed by YYYY-MM-DD", body = crate::holidays::HolidaysResponse),
        (status = 400, description = "Missing or malformed year / month")
    ),
    tag = "holidays"
)]
pub async fn get_holidays(data: web::Data<AppState>, query: web::Query<HolidayQuery>) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let year = q
        .year
        .as_deref()
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .ok_or_else(|| ApiError::validation("year is required"))?
        .parse::<i32>()
        .ok()
        .filter(|y| (1900..=9999).contains(y))
        .ok_or_else(|| ApiError::validation("year must be a four digit number"))?;
    let month = match q.month.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        None => None,
        Some(m) => Some(
            m.parse::<u32>()
                .ok()
                .filter(|m| (1..=12).contains(m))
                .ok_or_else(|| ApiError::validation("month must be between 1 and 12"))?,
        ),
    };
    Ok(HttpResponse::Ok().json(data.holidays.lookup(year, month).await))
}
