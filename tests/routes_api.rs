#![cfg(feature = "inmem-store")]

mod common;

use actix_web::{test, web, App};
use orderlink::{config, SecurityHeaders};
use serde_json::json;
use serial_test::serial;

#[actix_web::test]
#[serial]
async fn order_create_list_get_flow() {
    let (state, repo) = common::state();
    let (_uid, token) = common::supplier(&repo, "owner@example.com").await;
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(state))
            .configure(config),
    )
    .await;

    // unauthenticated
    let req = test::TestRequest::get().uri("/api/orders").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(common::bearer(&token))
        .set_json(&common::order_body("DRAFT"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = test::read_body_json(resp).await;
    let order = &created["order"];
    assert_eq!(order["status"], "DRAFT");
    assert_eq!(order["verificationCode"], "5678");
    assert_eq!(order["viewCount"], 0);
    assert_eq!(order["deliveryDate"], "2030-05-01");
    let number = order["orderNumber"].as_str().unwrap();
    assert_eq!(number.len(), 13);
    assert_eq!(&number[8..9], "-");
    assert_eq!(order["items"].as_array().unwrap().len(), 2);
    assert_eq!(order["items"][1]["sortOrder"], 1);
    let id = order["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(common::bearer(&token))
        .set_json(&common::order_body("SENT"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/orders?page=1&limit=1")
        .insert_header(common::bearer(&token))
        .to_request();
    let list: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(list["orders"].as_array().unwrap().len(), 1);
    assert_eq!(list["pagination"]["total"], 2);
    assert_eq!(list["pagination"]["totalPages"], 2);

    let req = test::TestRequest::get()
        .uri("/api/orders?status=sent")
        .insert_header(common::bearer(&token))
        .to_request();
    let list: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["orders"][0]["status"], "SENT");

    let req = test::TestRequest::get()
        .uri("/api/orders?status=SHIPPED")
        .insert_header(common::bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store, max-age=0");
    let detail: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(detail["order"]["histories"].as_array().unwrap().len(), 1);
    assert_eq!(detail["order"]["items"][0]["itemName"], "Cabbage");
}

#[actix_web::test]
#[serial]
async fn create_rejects_invalid_orders() {
    let (state, repo) = common::state();
    let (_uid, token) = common::supplier(&repo, "owner@example.com").await;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let mut missing = common::order_body("DRAFT");
    missing["recipientName"] = json!("   ");
    let mut no_items = common::order_body("DRAFT");
    no_items["items"] = json!([]);
    let mut zero_qty = common::order_body("DRAFT");
    zero_qty["items"][0]["quantity"] = json!(0);
    let mut no_unit = common::order_body("DRAFT");
    no_unit["items"][1]["unit"] = json!("");
    let mut bad_status = common::order_body("DRAFT");
    bad_status["status"] = json!("ACCEPTED");
    let mut bad_date = common::order_body("DRAFT");
    bad_date["deliveryDate"] = json!("next tuesday");

    for body in [missing, no_items, zero_qty, no_unit, bad_status, bad_date] {
        let req = test::TestRequest::post()
            .uri("/api/orders")
            .insert_header(common::bearer(&token))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "body {body}");
        let err: serde_json::Value = test::read_body_json(resp).await;
        assert!(err["error"].is_string());
    }
}

#[actix_web::test]
#[serial]
async fn update_only_while_draft() {
    let (state, repo) = common::state();
    let (_uid, token) = common::supplier(&repo, "owner@example.com").await;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(common::bearer(&token))
        .set_json(&common::order_body("DRAFT"))
        .to_request();
    let created: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = created["order"]["id"].as_i64().unwrap();

    // status other than SENT is refused
    let req = test::TestRequest::put()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&token))
        .set_json(&json!({"status": "ACCEPTED"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::put()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&token))
        .set_json(&json!({
            "memo": "front gate",
            "status": "SENT",
            "items": [{"itemName": "Garlic", "quantity": 2, "unit": "kg"}]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(updated["order"]["status"], "SENT");
    assert_eq!(updated["order"]["memo"], "front gate");
    assert_eq!(updated["order"]["recipientName"], "Kim");
    assert_eq!(updated["order"]["items"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::put()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&token))
        .set_json(&json!({"memo": "too late"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "sent orders cannot be modified");

    let req = test::TestRequest::get()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&token))
        .to_request();
    let detail: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let histories = detail["order"]["histories"].as_array().unwrap();
    assert_eq!(histories.len(), 2);
    assert_eq!(histories[0]["status"], "SENT");
    assert_eq!(detail["order"]["memo"], "front gate");
}

#[actix_web::test]
#[serial]
async fn delete_purges_draft_and_cancels_sent() {
    let (state, repo) = common::state();
    let (_uid, token) = common::supplier(&repo, "owner@example.com").await;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let mut ids = Vec::new();
    for status in ["DRAFT", "SENT"] {
        let req = test::TestRequest::post()
            .uri("/api/orders")
            .insert_header(common::bearer(&token))
            .set_json(&common::order_body(status))
            .to_request();
        let created: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
        ids.push(created["order"]["id"].as_i64().unwrap());
    }

    let req = test::TestRequest::delete()
        .uri(&format!("/api/orders/{}", ids[0]))
        .insert_header(common::bearer(&token))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["message"], "order deleted");
    let req = test::TestRequest::get()
        .uri(&format!("/api/orders/{}", ids[0]))
        .insert_header(common::bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    for expected in ["order cancelled", "order already cancelled"] {
        let req = test::TestRequest::delete()
            .uri(&format!("/api/orders/{}", ids[1]))
            .insert_header(common::bearer(&token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], expected);
    }
    let req = test::TestRequest::get()
        .uri(&format!("/api/orders/{}", ids[1]))
        .insert_header(common::bearer(&token))
        .to_request();
    let detail: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["order"]["status"], "CANCELLED");
    assert_eq!(detail["order"]["histories"].as_array().unwrap().len(), 2);
}

#[actix_web::test]
#[serial]
async fn orders_are_owner_scoped() {
    let (state, repo) = common::state();
    let (_a, alice) = common::supplier(&repo, "alice@example.com").await;
    let (_b, bob) = common::supplier(&repo, "bob@example.com").await;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(common::bearer(&alice))
        .set_json(&common::order_body("DRAFT"))
        .to_request();
    let created: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = created["order"]["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&bob))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/orders/{id}"))
        .insert_header(common::bearer(&bob))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri("/api/orders").insert_header(common::bearer(&bob)).to_request();
    let list: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(list["pagination"]["total"], 0);
}

#[actix_web::test]
#[serial]
async fn saved_records_and_recent_items() {
    let (state, repo) = common::state();
    let (_uid, token) = common::supplier(&repo, "owner@example.com").await;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let mut dest_ids = Vec::new();
    for (nick, default) in [("Main", true), ("Branch", true)] {
        let req = test::TestRequest::post()
            .uri("/api/destinations")
            .insert_header(common::bearer(&token))
            .set_json(&json!({
                "nickname": nick, "businessName": format!("{nick} Mart"), "contactName": "Lee",
                "phone1": "010-2222-3333", "address": "2 Harbor Rd", "isDefault": default
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        dest_ids.push(body["destination"]["id"].as_i64().unwrap());
    }
    let req = test::TestRequest::post()
        .uri("/api/destinations")
        .insert_header(common::bearer(&token))
        .set_json(&json!({"nickname": "Incomplete"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get().uri("/api/destinations").insert_header(common::bearer(&token)).to_request();
    let list: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let dests = list["destinations"].as_array().unwrap();
    assert_eq!(dests.iter().filter(|d| d["isDefault"] == true).count(), 1);
    assert_eq!(dests[0]["nickname"], "Branch");

    let req = test::TestRequest::get()
        .uri("/api/destinations?search=main")
        .insert_header(common::bearer(&token))
        .to_request();
    let list: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(list["destinations"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::post()
        .uri("/api/addresses")
        .insert_header(common::bearer(&token))
        .set_json(&json!({"nickname": "Warehouse", "address": "9 Dock St", "isDefault": true}))
        .to_request();
    let addr: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let addr_id = addr["address"]["id"].as_i64().unwrap();

    let req = test::TestRequest::put()
        .uri(&format!("/api/addresses/{addr_id}"))
        .insert_header(common::bearer(&token))
        .set_json(&json!({"nickname": "Warehouse 2", "address": "10 Dock St"}))
        .to_request();
    let updated: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(updated["address"]["nickname"], "Warehouse 2");
    assert_eq!(updated["address"]["isDefault"], false);

    // using saved records in an order bumps their usage
    let mut body = common::order_body("DRAFT");
    body["destinationId"] = json!(dest_ids[0]);
    body["addressId"] = json!(addr_id);
    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(common::bearer(&token))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri(&format!("/api/destinations/{}", dest_ids[0]))
        .insert_header(common::bearer(&token))
        .to_request();
    let dest: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(dest["destination"]["usageCount"], 1);

    let req = test::TestRequest::get()
        .uri("/api/recent-items?search=cab")
        .insert_header(common::bearer(&token))
        .to_request();
    let items: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let items = items["recentItems"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["itemName"], "Cabbage");
    assert_eq!(items[0]["itemSpec"], "10kg");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/addresses/{addr_id}"))
        .insert_header(common::bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get()
        .uri(&format!("/api/addresses/{addr_id}"))
        .insert_header(common::bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn healthz_is_public() {
    let (state, _repo) = common::state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;
    let req = test::TestRequest::get().uri("/healthz").to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["status"], "ok");
}
