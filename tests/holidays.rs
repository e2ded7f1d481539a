#![cfg(feature = "inmem-store")]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use async_trait::async_trait;
use orderlink::holidays::{HolidayError, HolidayMap, HolidayOrigin, HolidayService, HolidaySource};
use orderlink::rate_limit::RateLimits;
use orderlink::repo::inmem::InMemRepo;
use orderlink::{config, AppState};

/// One holiday on the 1st of every month; `failing` months error out.
#[derive(Default)]
struct FakeCalendar {
    calls: AtomicUsize,
    failing: HashSet<u32>,
}

impl FakeCalendar {
    fn failing(months: impl IntoIterator<Item = u32>) -> Self {
        Self { failing: months.into_iter().collect(), ..Default::default() }
    }
}

#[async_trait]
impl HolidaySource for FakeCalendar {
    async fn month(&self, year: i32, month: u32) -> Result<HolidayMap, HolidayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&month) {
            return Err(HolidayError::Upstream { code: "22".into(), message: "LIMITED NUMBER OF SERVICE REQUESTS".into() });
        }
        Ok(HolidayMap::from([(format!("{year}-{month:02}-01"), format!("Day {month}"))]))
    }
}

#[actix_web::test]
async fn no_upstream_means_fallback() {
    let svc = HolidayService::new(None);
    let res = svc.lookup(2025, Some(3)).await;
    assert_eq!(res.source, HolidayOrigin::Fallback);
    assert!(res.holidays.is_empty());
}

#[actix_web::test]
async fn year_lookup_merges_months_and_caches() {
    let cal = Arc::new(FakeCalendar::default());
    let svc = HolidayService::new(Some(cal.clone()));

    let res = svc.lookup(2025, None).await;
    assert_eq!(res.source, HolidayOrigin::Api);
    assert_eq!(res.holidays.len(), 12);
    assert_eq!(res.holidays.get("2025-12-01").map(String::as_str), Some("Day 12"));
    assert_eq!(cal.calls.load(Ordering::SeqCst), 12);

    let again = svc.lookup(2025, None).await;
    assert_eq!(again.source, HolidayOrigin::Cache);
    assert_eq!(again.holidays, res.holidays);
    assert_eq!(cal.calls.load(Ordering::SeqCst), 12);

    // month keys are cached separately from the year
    let march = svc.lookup(2025, Some(3)).await;
    assert_eq!(march.source, HolidayOrigin::Api);
    assert_eq!(march.holidays.len(), 1);
    assert_eq!(cal.calls.load(Ordering::SeqCst), 13);
}

#[actix_web::test]
async fn expired_cache_entries_are_refetched() {
    let cal = Arc::new(FakeCalendar::default());
    let svc = HolidayService::new(Some(cal.clone())).with_ttl(Duration::ZERO);
    svc.lookup(2025, Some(5)).await;
    let res = svc.lookup(2025, Some(5)).await;
    assert_eq!(res.source, HolidayOrigin::Api);
    assert_eq!(cal.calls.load(Ordering::SeqCst), 2);
}

#[actix_web::test]
async fn partial_failures_are_served_but_not_cached() {
    let cal = Arc::new(FakeCalendar::failing([2, 7]));
    let svc = HolidayService::new(Some(cal.clone()));

    let res = svc.lookup(2025, None).await;
    assert_eq!(res.source, HolidayOrigin::Api);
    assert_eq!(res.holidays.len(), 10);
    assert!(!res.holidays.contains_key("2025-02-01"));

    let again = svc.lookup(2025, None).await;
    assert_eq!(again.source, HolidayOrigin::Api);
    assert_eq!(cal.calls.load(Ordering::SeqCst), 24);
}

#[actix_web::test]
async fn total_failure_reports_error() {
    let cal = Arc::new(FakeCalendar::failing(1..=12));
    let svc = HolidayService::new(Some(cal));
    let res = svc.lookup(2025, Some(9)).await;
    assert_eq!(res.source, HolidayOrigin::Error);
    assert!(res.holidays.is_empty());
}

#[actix_web::test]
async fn route_validates_query() {
    let svc = HolidayService::new(Some(Arc::new(FakeCalendar::default())));
    let state = AppState::new(Arc::new(InMemRepo::new()), RateLimits::default(), svc);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    for uri in ["/api/holidays", "/api/holidays?year=", "/api/holidays?year=abc", "/api/holidays?year=2025&month=13"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "{uri}");
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    let req = test::TestRequest::get().uri("/api/holidays?year=2025&month=4").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["source"], "api");
    assert_eq!(body["holidays"]["2025-04-01"], "Day 4");
}

#[actix_web::test]
async fn portal_client_queries_by_month() {
    use orderlink::holidays::DataGoKr;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("serviceKey", "test-key"))
        .and(query_param("solYear", "2024"))
        .and(query_param("solMonth", "12"))
        .and(query_param("_type", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"response":{"header":{"resultCode":"00","resultMsg":"NORMAL SERVICE."},
                "body":{"items":{"item":{"dateName":"Christmas","isHoliday":"Y","locdate":20241225}}}}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("solMonth", "01"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DataGoKr::new(server.uri(), "test-key").unwrap();
    let december = client.month(2024, 12).await.unwrap();
    assert_eq!(december.get("2024-12-25").map(String::as_str), Some("Christmas"));
    assert!(matches!(client.month(2024, 1).await, Err(HolidayError::Http(_))));
}
