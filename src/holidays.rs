//! Public holiday lookup backed by the data.go.kr special-day service, with a
//! 24 hour in-process cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

pub const DEFAULT_API_URL: &str =
    "http://apis.data.go.kr/B090041/openapi/service/SpcdeInfoService/getRestDeInfo";
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// `YYYY-MM-DD` → holiday name.
pub type HolidayMap = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum HolidayError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("upstream returned {code}: {message}")]
    Upstream { code: String, message: String },
}

#[async_trait]
pub trait HolidaySource: Send + Sync {
    async fn month(&self, year: i32, month: u32) -> Result<HolidayMap, HolidayError>;
}

#[derive(Deserialize)]
struct Envelope {
    response: Payload,
}

#[derive(Deserialize)]
struct Payload {
    header: Header,
    body: Option<Body>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    result_code: String,
    #[serde(default)]
    result_msg: String,
}

#[derive(Deserialize)]
struct Body {
    #[serde(default)]
    items: Items,
}

/// The service sends `""` for an empty month and a bare object for a single hit.
#[derive(Deserialize)]
#[serde(untagged)]
enum Items {
    Present { item: OneOrMany },
    Empty(#[allow(dead_code)] String),
}

impl Default for Items {
    fn default() -> Self {
        Items::Empty(String::new())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Item>),
    One(Item),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    date_name: String,
    is_holiday: String,
    locdate: i64,
}

/// 20241225 → `2024-12-25`.
fn format_locdate(locdate: i64) -> Option<String> {
    let s = locdate.to_string();
    if s.len() != 8 {
        return None;
    }
    Some(format!("{}-{}-{}", &s[0..4], &s[4..6], &s[6..8]))
}

/// Extracts the days flagged as holidays from one month's response body.
pub fn parse_month(body: &str) -> Result<HolidayMap, HolidayError> {
    let env: Envelope = serde_json::from_str(body)?;
    let header = env.response.header;
    if header.result_code != "00" {
        return Err(HolidayError::Upstream { code: header.result_code, message: header.result_msg });
    }
    let items = match env.response.body.map(|b| b.items) {
        Some(Items::Present { item: OneOrMany::Many(v) }) => v,
        Some(Items::Present { item: OneOrMany::One(i) }) => vec![i],
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter(|i| i.is_holiday == "Y")
        .filter_map(|i| format_locdate(i.locdate).map(|d| (d, i.date_name)))
        .collect())
}

/// HTTP client for the public data portal.
pub struct DataGoKr {
    client: reqwest::Client,
    url: String,
    service_key: String,
}

impl DataGoKr {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Result<Self, HolidayError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, url: url.into(), service_key: service_key.into() })
    }
}

#[async_trait]
impl HolidaySource for DataGoKr {
    async fn month(&self, year: i32, month: u32) -> Result<HolidayMap, HolidayError> {
        let body = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("serviceKey", self.service_key.clone()),
                ("solYear", year.to_string()),
                ("solMonth", format!("{month:02}")),
                ("_type", "json".to_string()),
                ("numOfRows", "30".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_month(&body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HolidayOrigin {
    Api,
    Cache,
    Fallback,
    Error,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HolidaysResponse {
    pub holidays: HolidayMap,
    pub source: HolidayOrigin,
}

/// Cached front for a [`HolidaySource`]. Without a source every lookup is a
/// `fallback` and the client uses its built-in calendar.
pub struct HolidayService {
    source: Option<Arc<dyn HolidaySource>>,
    cache: DashMap<String, (HolidayMap, Instant)>,
    ttl: Duration,
}

impl HolidayService {
    pub fn new(source: Option<Arc<dyn HolidaySource>>) -> Self {
        Self { source, cache: DashMap::new(), ttl: CACHE_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `PUBLIC_DATA_API_KEY` enables the upstream; `HOLIDAY_API_URL` overrides its address.
    pub fn from_env() -> Self {
        let Ok(key) = std::env::var("PUBLIC_DATA_API_KEY") else {
            return Self::new(None);
        };
        let url = std::env::var("HOLIDAY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        match DataGoKr::new(url, key) {
            Ok(client) => Self::new(Some(Arc::new(client))),
            Err(e) => {
                error!(error = %e, "holiday client unavailable");
                Self::new(None)
            }
        }
    }

    pub async fn lookup(&self, year: i32, month: Option<u32>) -> HolidaysResponse {
        let Some(source) = &self.source else {
            return HolidaysResponse { holidays: HolidayMap::new(), source: HolidayOrigin::Fallback };
        };
        let key = match month {
            Some(m) => format!("{year}-{m:02}"),
            None => year.to_string(),
        };
        if let Some(hit) = self.cache.get(&key) {
            if hit.1.elapsed() < self.ttl {
                return HolidaysResponse { holidays: hit.0.clone(), source: HolidayOrigin::Cache };
            }
        }

        let months: Vec<u32> = match month {
            Some(m) => vec![m],
            None => (1..=12).collect(),
        };
        let results = join_all(months.iter().map(|&m| source.month(year, m))).await;
        let mut holidays = HolidayMap::new();
        let mut failed = 0;
        for (m, res) in months.iter().zip(results) {
            match res {
                Ok(found) => holidays.extend(found),
                Err(e) => {
                    warn!(year, month = m, error = %e, "holiday lookup failed");
                    failed += 1;
                }
            }
        }
        if failed == months.len() {
            return HolidaysResponse { holidays: HolidayMap::new(), source: HolidayOrigin::Error };
        }
        if failed == 0 {
            self.cache.insert(key, (holidays.clone(), Instant::now()));
        }
        HolidaysResponse { holidays, source: HolidayOrigin::Api }
    }
}
