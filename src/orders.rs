//! Order service: validates requests, asks the lifecycle what an action
//! means for the locked order and hands the resulting plan to storage.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::lifecycle::{self, Actor, DeleteAction, OrderStatus};
use crate::models::*;
use crate::repo::{OrderPlan, OrderScope, PlanOutcome, Repo};

/// Where a request came from; copied into recipient history rows.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    pub item_code: Option<String>,
    pub item_name: Option<String>,
    pub item_spec: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub recipient_name: Option<String>,
    pub recipient_business_name: Option<String>,
    pub recipient_business_number: Option<String>,
    pub recipient_phone1: Option<String>,
    pub recipient_phone2: Option<String>,
    pub recipient_address: Option<String>,
    pub recipient_address_detail: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_time: Option<String>,
    pub memo: Option<String>,
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub items: Vec<ItemInput>,
    pub destination_id: Option<Id>,
    pub address_id: Option<Id>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub recipient_name: Option<String>,
    pub recipient_business_name: Option<String>,
    pub recipient_business_number: Option<String>,
    pub recipient_phone1: Option<String>,
    pub recipient_phone2: Option<String>,
    pub recipient_address: Option<String>,
    pub recipient_address_detail: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_time: Option<String>,
    pub memo: Option<String>,
    pub status: Option<OrderStatus>,
    pub items: Option<Vec<ItemInput>>,
}

/// Trimmed, `None` when blank.
fn clean(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required(v: Option<String>, field: &str) -> Result<String, ApiError> {
    clean(v).ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

/// Sent-but-blank clears an optional column; absent leaves it alone.
fn optional_patch(v: Option<String>) -> Option<Option<String>> {
    v.map(|s| clean(Some(s)))
}

/// A present-but-blank value for a required field is an error; absent is fine.
fn required_patch(v: Option<String>, field: &str) -> Result<Option<String>, ApiError> {
    match v {
        None => Ok(None),
        Some(s) => required(Some(s), field).map(Some),
    }
}

pub fn validate_items(items: Vec<ItemInput>) -> Result<Vec<NewOrderItem>, ApiError> {
    if items.is_empty() {
        return Err(ApiError::validation("at least one item is required"));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let n = i + 1;
            let item_name = clean(item.item_name)
                .ok_or_else(|| ApiError::validation(format!("item {n}: itemName is required")))?;
            let unit = clean(item.unit)
                .ok_or_else(|| ApiError::validation(format!("item {n}: unit is required")))?;
            let quantity = match item.quantity {
                Some(q) if q.is_finite() && q > 0.0 => q,
                _ => return Err(ApiError::validation(format!("item {n}: quantity must be greater than zero"))),
            };
            Ok(NewOrderItem {
                item_code: clean(item.item_code),
                item_name,
                item_spec: clean(item.item_spec),
                quantity,
                unit,
            })
        })
        .collect()
}

/// Status change decided inside a planner, reported once the plan commits.
#[derive(Clone, Default)]
struct TransitionNote(Arc<Mutex<Option<(OrderStatus, OrderStatus)>>>);

impl TransitionNote {
    fn record(&self, from: OrderStatus, to: OrderStatus) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some((from, to));
        }
    }

    fn report(&self, order_id: Id, actor: &'static str) {
        let Some((from, to)) = self.0.lock().ok().and_then(|slot| *slot) else { return };
        info!(order_id, %from, %to, actor, "order status changed");
        counter!(
            "orderlink_order_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str(),
            "actor" => actor
        )
        .increment(1);
    }
}

/// Only recipient rows carry the caller's address and user agent.
fn history(status: OrderStatus, actor: Actor, reason: Option<String>, meta: Option<&RequestMeta>) -> NewHistory {
    NewHistory {
        status,
        reason,
        changed_by: actor.changed_by(),
        ip_address: meta.and_then(|m| m.ip.clone()),
        user_agent: meta.and_then(|m| m.user_agent.clone()),
    }
}

fn saved(outcome: PlanOutcome) -> Result<OrderView, ApiError> {
    match outcome {
        PlanOutcome::Saved(view) => Ok(view),
        PlanOutcome::Purged => Err(ApiError::NotFound),
    }
}

/// Validates and stores a new order. Returns it with its items.
pub async fn create_order(
    repo: &dyn Repo,
    owner: Id,
    req: CreateOrderRequest,
    now: DateTime<Utc>,
) -> Result<OrderView, ApiError> {
    let status = lifecycle::initial_status(req.status)?;
    let fields = OrderFields {
        recipient_name: required(req.recipient_name, "recipientName")?,
        recipient_business_name: required(req.recipient_business_name, "recipientBusinessName")?,
        recipient_business_number: clean(req.recipient_business_number),
        recipient_phone1: required(req.recipient_phone1, "recipientPhone1")?,
        recipient_phone2: clean(req.recipient_phone2),
        recipient_address: required(req.recipient_address, "recipientAddress")?,
        recipient_address_detail: clean(req.recipient_address_detail),
        delivery_date: req
            .delivery_date
            .ok_or_else(|| ApiError::validation("deliveryDate is required"))?,
        delivery_time: clean(req.delivery_time),
        memo: clean(req.memo),
    };
    let verification_code = lifecycle::verification_code(&fields.recipient_phone1)
        .ok_or_else(|| ApiError::validation("recipientPhone1 must contain at least 4 digits"))?;
    let items = validate_items(req.items)?;

    let today = now.date_naive();
    let mut order_number = lifecycle::generate_order_number(today);
    let mut attempts = 0;
    while repo.order_number_exists(&order_number).await? {
        if attempts == lifecycle::ORDER_NUMBER_RETRIES {
            warn!(%order_number, "order number still taken after retries");
            break;
        }
        attempts += 1;
        order_number = lifecycle::generate_order_number(today);
    }

    let view = repo
        .create_order(NewOrder {
            user_id: owner,
            order_number,
            fields,
            status,
            token: lifecycle::generate_token(),
            token_expires_at: lifecycle::token_expiry(now),
            verification_code,
            items,
            destination_id: req.destination_id,
            address_id: req.address_id,
        })
        .await?;
    info!(order_id = view.order.id, order_number = %view.order.order_number, %status, "order created");
    counter!("orderlink_order_transitions_total", "from" => "NEW", "to" => status.as_str(), "actor" => "owner")
        .increment(1);
    Ok(view)
}

/// Owner edit of a DRAFT order. Anything else is refused before the body is
/// looked at.
pub async fn update_order(
    repo: &dyn Repo,
    owner: Id,
    id: Id,
    req: UpdateOrderRequest,
) -> Result<OrderView, ApiError> {
    let current = repo.get_order(owner, id).await?;
    lifecycle::owner_update(current.order.status, None, owner)?;

    let patch = OrderPatch {
        recipient_name: required_patch(req.recipient_name, "recipientName")?,
        recipient_business_name: required_patch(req.recipient_business_name, "recipientBusinessName")?,
        recipient_business_number: optional_patch(req.recipient_business_number),
        recipient_phone1: required_patch(req.recipient_phone1, "recipientPhone1")?,
        recipient_phone2: optional_patch(req.recipient_phone2),
        recipient_address: required_patch(req.recipient_address, "recipientAddress")?,
        recipient_address_detail: optional_patch(req.recipient_address_detail),
        delivery_date: req.delivery_date,
        delivery_time: optional_patch(req.delivery_time),
        memo: optional_patch(req.memo),
    };
    let items = req.items.map(validate_items).transpose()?;
    let requested = req.status;

    let note = TransitionNote::default();
    let seen = note.clone();
    let outcome = repo
        .apply_order_plan(
            OrderScope::Owned { user_id: owner, id },
            Box::new(move |order: &Order| {
                let status = lifecycle::owner_update(order.status, requested, owner)?;
                if let Some(to) = status {
                    seen.record(order.status, to);
                }
                Ok(OrderPlan {
                    patch: Some(patch),
                    status,
                    items,
                    history: status.map(|to| history(to, Actor::Owner(owner), None, None)),
                    ..Default::default()
                })
            }),
        )
        .await?;
    note.report(id, "owner");
    saved(outcome)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
    AlreadyCancelled,
}

impl DeleteOutcome {
    pub fn message(self) -> &'static str {
        match self {
            DeleteOutcome::Deleted => "order deleted",
            DeleteOutcome::Cancelled => "order cancelled",
            DeleteOutcome::AlreadyCancelled => "order already cancelled",
        }
    }
}

/// DRAFT orders are removed; sent ones are cancelled and kept.
pub async fn delete_order(repo: &dyn Repo, owner: Id, id: Id) -> Result<DeleteOutcome, ApiError> {
    let note = TransitionNote::default();
    let seen = note.clone();
    let action = Arc::new(Mutex::new(DeleteAction::Noop));
    let chosen = action.clone();
    let outcome = repo
        .apply_order_plan(
            OrderScope::Owned { user_id: owner, id },
            Box::new(move |order: &Order| {
                let act = lifecycle::owner_delete(order.status, owner);
                if let Ok(mut slot) = chosen.lock() {
                    *slot = act;
                }
                Ok(match act {
                    DeleteAction::Purge => OrderPlan::purge(),
                    DeleteAction::Noop => OrderPlan::default(),
                    DeleteAction::Cancel => {
                        seen.record(order.status, OrderStatus::Cancelled);
                        OrderPlan {
                            status: Some(OrderStatus::Cancelled),
                            history: Some(history(OrderStatus::Cancelled, Actor::Owner(owner), None, None)),
                            ..Default::default()
                        }
                    }
                })
            }),
        )
        .await?;
    note.report(id, "owner");
    let act = action.lock().map(|a| *a).unwrap_or(DeleteAction::Noop);
    Ok(match (outcome, act) {
        (PlanOutcome::Purged, _) => {
            info!(order_id = id, "draft order deleted");
            DeleteOutcome::Deleted
        }
        (_, DeleteAction::Cancel) => DeleteOutcome::Cancelled,
        _ => DeleteOutcome::AlreadyCancelled,
    })
}

/// Sanitised order for the public link, with the supplier's contact card.
pub async fn public_order(repo: &dyn Repo, token: &str, now: DateTime<Utc>) -> Result<PublicOrder, ApiError> {
    let view = repo.find_order_by_token(token).await?;
    lifecycle::check_public_access(&view.order, now)?;
    let supplier = repo.get_user(view.order.user_id).await.ok().map(Supplier::from);
    Ok(PublicOrder::new(view, supplier))
}

/// Checks the recipient's code; the first success marks the order VIEWED.
pub async fn verify_recipient(
    repo: &dyn Repo,
    token: &str,
    code: Option<String>,
    meta: RequestMeta,
    now: DateTime<Utc>,
) -> Result<OrderView, ApiError> {
    // compared as sent; only a missing or blank code is a bad request
    let code = code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::validation("verification code is required"))?;
    let note = TransitionNote::default();
    let seen = note.clone();
    let outcome = repo
        .apply_order_plan(
            OrderScope::Token(token.to_string()),
            Box::new(move |order: &Order| {
                let status = lifecycle::recipient_verify(order, &code, now)?;
                if let Some(to) = status {
                    seen.record(order.status, to);
                }
                Ok(OrderPlan {
                    status,
                    history: status.map(|to| history(to, Actor::Recipient, None, Some(&meta))),
                    viewed_at: Some(now),
                    ..Default::default()
                })
            }),
        )
        .await?;
    let view = saved(outcome)?;
    note.report(view.order.id, lifecycle::RECIPIENT);
    Ok(view)
}

/// Records the recipient's answer. Only one answer is ever accepted.
pub async fn respond(
    repo: &dyn Repo,
    token: &str,
    response: Option<String>,
    reason: Option<String>,
    meta: RequestMeta,
    now: DateTime<Utc>,
) -> Result<OrderView, ApiError> {
    let invalid = || ApiError::validation("response must be one of ACCEPTED, REJECTED, REVIEWING");
    let response: OrderStatus = response
        .as_deref()
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;
    if !response.is_recipient_response() {
        return Err(invalid());
    }
    let note = TransitionNote::default();
    let seen = note.clone();
    let outcome = repo
        .apply_order_plan(
            OrderScope::Token(token.to_string()),
            Box::new(move |order: &Order| {
                let to = lifecycle::recipient_respond(order, response, now)?;
                seen.record(order.status, to);
                Ok(OrderPlan {
                    status: Some(to),
                    history: Some(history(to, Actor::Recipient, reason, Some(&meta))),
                    ..Default::default()
                })
            }),
        )
        .await?;
    let view = saved(outcome)?;
    note.report(view.order.id, lifecycle::RECIPIENT);
    Ok(view)
}

pub fn response_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Accepted => "order accepted",
        OrderStatus::Rejected => "order rejected",
        OrderStatus::Reviewing => "review request sent",
        _ => "response recorded",
    }
}

#[cfg(all(test, feature = "inmem-store"))]
mod tests {
    use super::*;
    use crate::repo::inmem::InMemRepo;
    use crate::repo::{
        AddressRepo, DestinationRepo, OrderPlanner, OrderRepo, RecentItemRepo, RepoError, RepoResult, UserRepo,
    };
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose first `taken` order-number lookups all report a collision.
    /// With `taken == usize::MAX` inserts fail the way a unique index would.
    struct Crowded {
        inner: InMemRepo,
        taken: usize,
        lookups: AtomicUsize,
    }

    impl Crowded {
        fn new(taken: usize) -> Self {
            Self { inner: InMemRepo::new(), taken, lookups: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl UserRepo for Crowded {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> { self.inner.create_user(new).await }
        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> { self.inner.find_user_by_email(email).await }
        async fn get_user(&self, id: Id) -> RepoResult<User> { self.inner.get_user(id).await }
    }

    #[async_trait]
    impl OrderRepo for Crowded {
        async fn order_number_exists(&self, _order_number: &str) -> RepoResult<bool> {
            Ok(self.lookups.fetch_add(1, Ordering::SeqCst) < self.taken)
        }
        async fn create_order(&self, new: NewOrder) -> RepoResult<OrderView> {
            if self.taken == usize::MAX {
                return Err(RepoError::Conflict("order number already exists".into()));
            }
            self.inner.create_order(new).await
        }
        async fn list_orders(&self, user_id: Id, filter: &OrderFilter) -> RepoResult<(Vec<OrderView>, u64)> {
            self.inner.list_orders(user_id, filter).await
        }
        async fn get_order(&self, user_id: Id, id: Id) -> RepoResult<OrderDetail> { self.inner.get_order(user_id, id).await }
        async fn find_order_by_token(&self, token: &str) -> RepoResult<OrderView> {
            self.inner.find_order_by_token(token).await
        }
        async fn apply_order_plan(&self, scope: OrderScope, planner: OrderPlanner) -> RepoResult<PlanOutcome> {
            self.inner.apply_order_plan(scope, planner).await
        }
    }

    #[async_trait]
    impl AddressRepo for Crowded {
        async fn list_addresses(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedAddress>> {
            self.inner.list_addresses(user_id, search).await
        }
        async fn get_address(&self, user_id: Id, id: Id) -> RepoResult<SavedAddress> { self.inner.get_address(user_id, id).await }
        async fn create_address(&self, user_id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
            self.inner.create_address(user_id, input).await
        }
        async fn update_address(&self, user_id: Id, id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
            self.inner.update_address(user_id, id, input).await
        }
        async fn delete_address(&self, user_id: Id, id: Id) -> RepoResult<()> { self.inner.delete_address(user_id, id).await }
    }

    #[async_trait]
    impl DestinationRepo for Crowded {
        async fn list_destinations(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedDestination>> {
            self.inner.list_destinations(user_id, search).await
        }
        async fn get_destination(&self, user_id: Id, id: Id) -> RepoResult<SavedDestination> {
            self.inner.get_destination(user_id, id).await
        }
        async fn create_destination(&self, user_id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
            self.inner.create_destination(user_id, input).await
        }
        async fn update_destination(&self, user_id: Id, id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
            self.inner.update_destination(user_id, id, input).await
        }
        async fn delete_destination(&self, user_id: Id, id: Id) -> RepoResult<()> {
            self.inner.delete_destination(user_id, id).await
        }
    }

    #[async_trait]
    impl RecentItemRepo for Crowded {
        async fn list_recent_items(&self, user_id: Id, search: Option<&str>, limit: u32) -> RepoResult<Vec<RecentItem>> {
            self.inner.list_recent_items(user_id, search, limit).await
        }
    }

    fn item(name: &str, qty: f64) -> ItemInput {
        ItemInput { item_code: None, item_name: Some(name.into()), item_spec: None, quantity: Some(qty), unit: Some("box".into()) }
    }

    fn create_req(status: Option<OrderStatus>) -> CreateOrderRequest {
        CreateOrderRequest {
            recipient_name: Some("Kim".into()),
            recipient_business_name: Some("Kim Foods".into()),
            recipient_business_number: None,
            recipient_phone1: Some("010-1234-5678".into()),
            recipient_phone2: None,
            recipient_address: Some("1 Market St".into()),
            recipient_address_detail: Some("  ".into()),
            delivery_date: NaiveDate::from_ymd_opt(2030, 1, 2),
            delivery_time: None,
            memo: None,
            status,
            items: vec![item("Cabbage", 3.0), item("Radish", 1.5)],
            destination_id: None,
            address_id: None,
        }
    }

    async fn owner(repo: &InMemRepo) -> Id {
        repo.create_user(NewUser {
            email: "s@example.com".into(),
            password_hash: "x".into(),
            name: Some("Supplier".into()),
            business_name: None,
            phone: None,
        })
        .await
        .unwrap()
        .id
    }

    #[actix_rt::test]
    async fn create_fills_generated_fields() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let now = Utc::now();
        let view = create_order(&repo, uid, create_req(None), now).await.unwrap();
        let o = &view.order;
        assert_eq!(o.status, OrderStatus::Draft);
        assert_eq!(o.verification_code, "5678");
        assert_eq!(o.token.len(), 64);
        assert_eq!(o.token_expires_at, now + Duration::days(30));
        assert_eq!(o.recipient_address_detail, None);
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[1].sort_order, 1);
        let detail = repo.get_order(uid, o.id).await.unwrap();
        assert_eq!(detail.histories.len(), 1);
        assert_eq!(detail.histories[0].changed_by, uid.to_string());
    }

    #[actix_rt::test]
    async fn order_number_collisions_are_retried() {
        let repo = Crowded::new(3);
        let uid = owner(&repo.inner).await;
        let view = create_order(&repo, uid, create_req(None), Utc::now()).await.unwrap();
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 4);
        assert!(repo.inner.order_number_exists(&view.order.order_number).await.unwrap());
    }

    #[actix_rt::test]
    async fn order_number_retries_give_up_after_five() {
        let repo = Crowded::new(usize::MAX);
        let uid = owner(&repo.inner).await;
        let err = create_order(&repo, uid, create_req(None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        // first lookup plus one per regenerated number
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 1 + lifecycle::ORDER_NUMBER_RETRIES);
    }

    #[actix_rt::test]
    async fn create_rejects_bad_input() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let mut req = create_req(None);
        req.items.clear();
        assert!(matches!(create_order(&repo, uid, req, Utc::now()).await, Err(ApiError::Validation(_))));

        let mut req = create_req(None);
        req.items = vec![item("Cabbage", 0.0)];
        assert!(matches!(create_order(&repo, uid, req, Utc::now()).await, Err(ApiError::Validation(_))));

        let mut req = create_req(None);
        req.recipient_phone1 = Some("12-3".into());
        assert!(matches!(create_order(&repo, uid, req, Utc::now()).await, Err(ApiError::Validation(_))));

        let req = create_req(Some(OrderStatus::Accepted));
        assert!(matches!(create_order(&repo, uid, req, Utc::now()).await, Err(ApiError::Validation(_))));
    }

    #[actix_rt::test]
    async fn sent_orders_are_not_editable() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let view = create_order(&repo, uid, create_req(Some(OrderStatus::Sent)), Utc::now()).await.unwrap();
        let req = UpdateOrderRequest { items: Some(vec![]), ..Default::default() };
        let err = update_order(&repo, uid, view.order.id, req).await.unwrap_err();
        assert_eq!(err.to_string(), "sent orders cannot be modified");
    }

    #[actix_rt::test]
    async fn draft_edit_keeps_secrets() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let view = create_order(&repo, uid, create_req(None), Utc::now()).await.unwrap();
        let req = UpdateOrderRequest {
            recipient_phone1: Some("010-9999-0000".into()),
            status: Some(OrderStatus::Sent),
            items: Some(vec![item("Garlic", 2.0)]),
            ..Default::default()
        };
        let updated = update_order(&repo, uid, view.order.id, req).await.unwrap();
        assert_eq!(updated.order.status, OrderStatus::Sent);
        assert_eq!(updated.order.recipient_phone1, "010-9999-0000");
        assert_eq!(updated.order.verification_code, "5678");
        assert_eq!(updated.order.token, view.order.token);
        assert_eq!(updated.items.len(), 1);
        let detail = repo.get_order(uid, view.order.id).await.unwrap();
        assert_eq!(detail.histories[0].status, OrderStatus::Sent);
    }

    #[actix_rt::test]
    async fn blank_optional_fields_are_cleared_on_edit() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let mut req = create_req(None);
        req.recipient_phone2 = Some("02-111-2222".into());
        req.memo = Some("back door".into());
        let view = create_order(&repo, uid, req, Utc::now()).await.unwrap();
        assert_eq!(view.order.recipient_phone2.as_deref(), Some("02-111-2222"));

        let req = UpdateOrderRequest {
            recipient_phone2: Some("".into()),
            recipient_business_number: Some("  ".into()),
            delivery_time: Some(" 10:00 ".into()),
            ..Default::default()
        };
        let updated = update_order(&repo, uid, view.order.id, req).await.unwrap();
        assert_eq!(updated.order.recipient_phone2, None);
        assert_eq!(updated.order.recipient_business_number, None);
        assert_eq!(updated.order.delivery_time.as_deref(), Some("10:00"));
        assert_eq!(updated.order.memo.as_deref(), Some("back door"));
    }

    #[actix_rt::test]
    async fn owner_history_rows_carry_no_client_details() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let draft = create_order(&repo, uid, create_req(None), Utc::now()).await.unwrap();
        let req = UpdateOrderRequest { status: Some(OrderStatus::Sent), ..Default::default() };
        update_order(&repo, uid, draft.order.id, req).await.unwrap();
        delete_order(&repo, uid, draft.order.id).await.unwrap();

        let detail = repo.get_order(uid, draft.order.id).await.unwrap();
        let statuses: Vec<_> = detail.histories.iter().map(|h| h.status).collect();
        assert_eq!(statuses, vec![OrderStatus::Cancelled, OrderStatus::Sent, OrderStatus::Draft]);
        for h in &detail.histories {
            assert_eq!(h.changed_by, uid.to_string());
            assert_eq!(h.ip_address, None);
            assert_eq!(h.user_agent, None);
        }
    }

    #[actix_rt::test]
    async fn delete_purges_drafts_and_cancels_the_rest() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let draft = create_order(&repo, uid, create_req(None), Utc::now()).await.unwrap();
        let sent = create_order(&repo, uid, create_req(Some(OrderStatus::Sent)), Utc::now()).await.unwrap();

        assert_eq!(delete_order(&repo, uid, draft.order.id).await.unwrap(), DeleteOutcome::Deleted);
        assert!(matches!(repo.get_order(uid, draft.order.id).await, Err(crate::repo::RepoError::NotFound)));

        assert_eq!(delete_order(&repo, uid, sent.order.id).await.unwrap(), DeleteOutcome::Cancelled);
        assert_eq!(
            delete_order(&repo, uid, sent.order.id).await.unwrap(),
            DeleteOutcome::AlreadyCancelled
        );
        let detail = repo.get_order(uid, sent.order.id).await.unwrap();
        assert_eq!(detail.order.status, OrderStatus::Cancelled);
        assert_eq!(detail.histories.len(), 2);
    }

    #[actix_rt::test]
    async fn recipient_flow() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let now = Utc::now();
        let sent = create_order(&repo, uid, create_req(Some(OrderStatus::Sent)), now).await.unwrap();
        let token = sent.order.token.clone();
        let meta = RequestMeta { ip: Some("10.0.0.1".into()), user_agent: Some("ua".into()) };

        let public = public_order(&repo, &token, now).await.unwrap();
        assert_eq!(public.supplier.unwrap().email, "s@example.com");

        let err = verify_recipient(&repo, &token, Some("0000".into()), meta.clone(), now).await.unwrap_err();
        assert!(matches!(err, ApiError::VerificationFailed));
        let err = verify_recipient(&repo, &token, Some(" 5678 ".into()), meta.clone(), now).await.unwrap_err();
        assert!(matches!(err, ApiError::VerificationFailed));
        let err = verify_recipient(&repo, &token, Some(" ".into()), meta.clone(), now).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(repo.find_order_by_token(&token).await.unwrap().order.view_count, 0);

        let v = verify_recipient(&repo, &token, Some("5678".into()), meta.clone(), now).await.unwrap();
        assert_eq!(v.order.status, OrderStatus::Viewed);
        let v = verify_recipient(&repo, &token, Some("5678".into()), meta.clone(), now).await.unwrap();
        assert_eq!(v.order.view_count, 2);
        assert_eq!(repo.get_order(uid, v.order.id).await.unwrap().histories.len(), 2);

        let r = respond(&repo, &token, Some("REJECTED".into()), Some("out of stock".into()), meta.clone(), now)
            .await
            .unwrap();
        assert_eq!(r.order.status, OrderStatus::Rejected);
        let again = respond(&repo, &token, Some("ACCEPTED".into()), None, meta.clone(), now).await;
        assert!(matches!(again, Err(ApiError::AlreadyProcessed)));

        let detail = repo.get_order(uid, r.order.id).await.unwrap();
        assert_eq!(detail.histories[0].reason.as_deref(), Some("out of stock"));
        assert_eq!(detail.histories[0].changed_by, "recipient");
        assert_eq!(detail.histories[0].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[actix_rt::test]
    async fn expiry_and_visibility() {
        let repo = InMemRepo::new();
        let uid = owner(&repo).await;
        let now = Utc::now();
        let draft = create_order(&repo, uid, create_req(None), now).await.unwrap();
        let sent = create_order(&repo, uid, create_req(Some(OrderStatus::Sent)), now).await.unwrap();

        assert!(matches!(public_order(&repo, &draft.order.token, now).await, Err(ApiError::NotFound)));
        assert!(matches!(public_order(&repo, "missing", now).await, Err(ApiError::NotFound)));
        let later = now + Duration::days(31);
        assert!(matches!(public_order(&repo, &sent.order.token, later).await, Err(ApiError::TokenExpired)));
        let res = respond(&repo, &sent.order.token, Some("ACCEPTED".into()), None, RequestMeta::default(), later).await;
        assert!(matches!(res, Err(ApiError::TokenExpired)));
        let res = respond(&repo, &sent.order.token, Some("SENT".into()), None, RequestMeta::default(), now).await;
        assert!(matches!(res, Err(ApiError::Validation(_))));
    }
}
