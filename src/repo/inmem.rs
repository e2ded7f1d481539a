use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

#[derive(Default, Clone, Serialize, Deserialize)]
struct State {
    users: BTreeMap<Id, User>,
    orders: BTreeMap<Id, Order>,
    items: BTreeMap<Id, OrderItem>,
    histories: BTreeMap<Id, OrderHistory>,
    addresses: BTreeMap<Id, SavedAddress>,
    destinations: BTreeMap<Id, SavedDestination>,
    recent_items: BTreeMap<Id, RecentItem>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn items_of(&self, order_id: Id) -> Vec<OrderItem> {
        let mut v: Vec<_> = self.items.values().filter(|i| i.order_id == order_id).cloned().collect();
        v.sort_by_key(|i| i.sort_order);
        v
    }

    fn view(&self, order: &Order) -> OrderView {
        OrderView { order: order.clone(), items: self.items_of(order.id) }
    }

    fn replace_items(&mut self, order_id: Id, items: Vec<NewOrderItem>) {
        self.items.retain(|_, i| i.order_id != order_id);
        for (idx, item) in items.into_iter().enumerate() {
            let id = self.next_id();
            self.items.insert(id, OrderItem {
                id,
                order_id,
                item_code: item.item_code,
                item_name: item.item_name,
                item_spec: item.item_spec,
                quantity: item.quantity,
                unit: item.unit,
                sort_order: idx as i32,
            });
        }
    }

    fn push_history(&mut self, order_id: Id, h: NewHistory, at: DateTime<Utc>) {
        let id = self.next_id();
        self.histories.insert(id, OrderHistory {
            id,
            order_id,
            status: h.status,
            reason: h.reason,
            changed_by: h.changed_by,
            ip_address: h.ip_address,
            user_agent: h.user_agent,
            created_at: at,
        });
    }

    fn bump_recent(&mut self, user_id: Id, item: &NewOrderItem, at: DateTime<Utc>) {
        let spec = item.item_spec.clone().unwrap_or_default();
        let existing = self
            .recent_items
            .values_mut()
            .find(|r| r.user_id == user_id && r.item_name == item.item_name && r.item_spec == spec);
        match existing {
            Some(r) => {
                r.usage_count += 1;
                r.last_used_at = at;
                r.item_code = item.item_code.clone();
                r.unit = item.unit.clone();
            }
            None => {
                let id = self.next_id();
                self.recent_items.insert(id, RecentItem {
                    id,
                    user_id,
                    item_code: item.item_code.clone(),
                    item_name: item.item_name.clone(),
                    item_spec: spec,
                    unit: item.unit.clone(),
                    usage_count: 1,
                    last_used_at: at,
                });
            }
        }
    }

    fn find_order(&self, scope: &OrderScope) -> Option<Order> {
        match scope {
            OrderScope::Owned { user_id, id } => self.orders.get(id).filter(|o| o.user_id == *user_id).cloned(),
            OrderScope::Token(t) => self.orders.values().find(|o| &o.token == t).cloned(),
        }
    }
}

/// Shared shape of saved addresses / destinations.
trait SavedRecord: Clone {
    fn owner(&self) -> Id;
    fn set_default(&mut self, v: bool);
    fn rank(&self) -> (bool, i64, Option<DateTime<Utc>>);
    fn mark_used(&mut self, at: DateTime<Utc>);
}

impl SavedRecord for SavedAddress {
    fn owner(&self) -> Id { self.user_id }
    fn set_default(&mut self, v: bool) { self.is_default = v; }
    fn rank(&self) -> (bool, i64, Option<DateTime<Utc>>) { (self.is_default, self.usage_count, self.last_used_at) }
    fn mark_used(&mut self, at: DateTime<Utc>) { self.usage_count += 1; self.last_used_at = Some(at); }
}

impl SavedRecord for SavedDestination {
    fn owner(&self) -> Id { self.user_id }
    fn set_default(&mut self, v: bool) { self.is_default = v; }
    fn rank(&self) -> (bool, i64, Option<DateTime<Utc>>) { (self.is_default, self.usage_count, self.last_used_at) }
    fn mark_used(&mut self, at: DateTime<Utc>) { self.usage_count += 1; self.last_used_at = Some(at); }
}

fn clear_defaults<T: SavedRecord>(map: &mut BTreeMap<Id, T>, user_id: Id) {
    for rec in map.values_mut().filter(|r| r.owner() == user_id) {
        rec.set_default(false);
    }
}

/// Default first, then most used, then most recently used (never-used last).
fn ranked<T: SavedRecord>(mut v: Vec<T>) -> Vec<T> {
    v.sort_by(|a, b| b.rank().cmp(&a.rank()));
    v
}

fn owned<T: SavedRecord>(map: &BTreeMap<Id, T>, user_id: Id, id: Id) -> RepoResult<T> {
    map.get(&id).filter(|r| r.owner() == user_id).cloned().ok_or(RepoError::NotFound)
}

fn contains_ci(haystacks: &[&str], needle: Option<&str>) -> bool {
    match needle.map(str::trim).filter(|n| !n.is_empty()) {
        None => true,
        Some(n) => {
            let n = n.to_lowercase();
            haystacks.iter().any(|h| h.to_lowercase().contains(&n))
        }
    }
}

/// Process-local store. Every write runs on a copy of the state that only
/// replaces the live one when the whole closure succeeds.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Ephemeral store, nothing touches disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot at `path`, loaded now and rewritten
    /// after each committed write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    /// `ORDERLINK_DATA_DIR/state.json` when the variable is set, else ephemeral.
    pub fn from_env() -> Self {
        match std::env::var("ORDERLINK_DATA_DIR") {
            Ok(dir) => Self::open(Path::new(&dir).join("state.json")),
            Err(_) => Self::new(),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!(path = %path.display(), "loaded snapshot");
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    fn persist(&self, state: &State) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode snapshot"),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> RepoResult<T>) -> RepoResult<T> {
        let s = self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))?;
        f(&s)
    }

    /// Unit of work: `f` mutates a draft; the draft is committed only on `Ok`.
    fn transact<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut live = self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))?;
        let mut draft = live.clone();
        let out = f(&mut draft)?;
        *live = draft;
        self.persist(&live);
        Ok(out)
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        self.transact(|s| {
            if s.users.values().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
                return Err(RepoError::Conflict("email already registered".into()));
            }
            let id = s.next_id();
            let user = User {
                id,
                email: new.email,
                password_hash: new.password_hash,
                name: new.name,
                business_name: new.business_name,
                phone: new.phone,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            Ok(user)
        })
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
        self.read(|s| {
            s.users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned().ok_or(RepoError::NotFound)
        })
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.read(|s| s.users.get(&id).cloned().ok_or(RepoError::NotFound))
    }
}

#[async_trait]
impl OrderRepo for InMemRepo {
    async fn order_number_exists(&self, order_number: &str) -> RepoResult<bool> {
        self.read(|s| Ok(s.orders.values().any(|o| o.order_number == order_number)))
    }

    async fn create_order(&self, new: NewOrder) -> RepoResult<OrderView> {
        self.transact(|s| {
            if s.orders.values().any(|o| o.order_number == new.order_number) {
                return Err(RepoError::Conflict("order number already exists".into()));
            }
            let now = Utc::now();
            let id = s.next_id();
            let f = new.fields;
            let order = Order {
                id,
                user_id: new.user_id,
                order_number: new.order_number,
                recipient_name: f.recipient_name,
                recipient_business_name: f.recipient_business_name,
                recipient_business_number: f.recipient_business_number,
                recipient_phone1: f.recipient_phone1,
                recipient_phone2: f.recipient_phone2,
                recipient_address: f.recipient_address,
                recipient_address_detail: f.recipient_address_detail,
                delivery_date: f.delivery_date,
                delivery_time: f.delivery_time,
                memo: f.memo,
                status: new.status,
                token: new.token,
                token_expires_at: new.token_expires_at,
                verification_code: new.verification_code,
                view_count: 0,
                last_viewed_at: None,
                created_at: now,
                updated_at: now,
            };
            s.orders.insert(id, order.clone());
            for item in &new.items {
                s.bump_recent(new.user_id, item, now);
            }
            s.replace_items(id, new.items);
            s.push_history(id, NewHistory {
                status: new.status,
                reason: None,
                changed_by: new.user_id.to_string(),
                ip_address: None,
                user_agent: None,
            }, now);
            if let Some(dest_id) = new.destination_id {
                if let Some(d) = s.destinations.get_mut(&dest_id).filter(|d| d.user_id == new.user_id) {
                    d.mark_used(now);
                }
            }
            if let Some(addr_id) = new.address_id {
                if let Some(a) = s.addresses.get_mut(&addr_id).filter(|a| a.user_id == new.user_id) {
                    a.mark_used(now);
                }
            }
            Ok(s.view(&order))
        })
    }

    async fn list_orders(&self, user_id: Id, filter: &OrderFilter) -> RepoResult<(Vec<OrderView>, u64)> {
        self.read(|s| {
            let mut mine: Vec<&Order> = s
                .orders
                .values()
                .filter(|o| o.user_id == user_id && filter.status.map_or(true, |st| o.status == st))
                .collect();
            mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let total = mine.len() as u64;
            let page = mine
                .into_iter()
                .skip(filter.offset() as usize)
                .take(filter.limit as usize)
                .map(|o| s.view(o))
                .collect();
            Ok((page, total))
        })
    }

    async fn get_order(&self, user_id: Id, id: Id) -> RepoResult<OrderDetail> {
        self.read(|s| {
            let order = s.find_order(&OrderScope::Owned { user_id, id }).ok_or(RepoError::NotFound)?;
            let mut histories: Vec<_> = s.histories.values().filter(|h| h.order_id == id).cloned().collect();
            histories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(OrderDetail { items: s.items_of(id), histories, order })
        })
    }

    async fn find_order_by_token(&self, token: &str) -> RepoResult<OrderView> {
        self.read(|s| {
            let order = s.find_order(&OrderScope::Token(token.to_string())).ok_or(RepoError::NotFound)?;
            Ok(s.view(&order))
        })
    }

    async fn apply_order_plan(&self, scope: OrderScope, planner: OrderPlanner) -> RepoResult<PlanOutcome> {
        self.transact(|s| {
            let current = s.find_order(&scope).ok_or(RepoError::NotFound)?;
            let plan = planner(&current)?;
            let id = current.id;
            if plan.delete {
                s.orders.remove(&id);
                s.items.retain(|_, i| i.order_id != id);
                s.histories.retain(|_, h| h.order_id != id);
                return Ok(PlanOutcome::Purged);
            }
            let now = Utc::now();
            let mut next = current;
            plan.apply_to(&mut next, now);
            s.orders.insert(id, next.clone());
            if let Some(items) = plan.items {
                s.replace_items(id, items);
            }
            if let Some(h) = plan.history {
                s.push_history(id, h, now);
            }
            Ok(PlanOutcome::Saved(s.view(&next)))
        })
    }
}

#[async_trait]
impl AddressRepo for InMemRepo {
    async fn list_addresses(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedAddress>> {
        self.read(|s| {
            let v = s
                .addresses
                .values()
                .filter(|a| a.user_id == user_id && contains_ci(&[a.nickname.as_str(), a.address.as_str()], search))
                .cloned()
                .collect();
            Ok(ranked(v))
        })
    }

    async fn get_address(&self, user_id: Id, id: Id) -> RepoResult<SavedAddress> {
        self.read(|s| owned(&s.addresses, user_id, id))
    }

    async fn create_address(&self, user_id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
        self.transact(|s| {
            if input.is_default {
                clear_defaults(&mut s.addresses, user_id);
            }
            let now = Utc::now();
            let id = s.next_id();
            let rec = SavedAddress {
                id,
                user_id,
                nickname: input.nickname,
                address: input.address,
                address_detail: input.address_detail,
                is_default: input.is_default,
                usage_count: 0,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            };
            s.addresses.insert(id, rec.clone());
            Ok(rec)
        })
    }

    async fn update_address(&self, user_id: Id, id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
        self.transact(|s| {
            let mut rec = owned(&s.addresses, user_id, id)?;
            if input.is_default {
                clear_defaults(&mut s.addresses, user_id);
            }
            rec.nickname = input.nickname;
            rec.address = input.address;
            rec.address_detail = input.address_detail;
            rec.is_default = input.is_default;
            rec.updated_at = Utc::now();
            s.addresses.insert(id, rec.clone());
            Ok(rec)
        })
    }

    async fn delete_address(&self, user_id: Id, id: Id) -> RepoResult<()> {
        self.transact(|s| {
            owned(&s.addresses, user_id, id)?;
            s.addresses.remove(&id);
            Ok(())
        })
    }
}

#[async_trait]
impl DestinationRepo for InMemRepo {
    async fn list_destinations(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedDestination>> {
        self.read(|s| {
            let v = s
                .destinations
                .values()
                .filter(|d| {
                    d.user_id == user_id
                        && contains_ci(
                            &[d.nickname.as_str(), d.business_name.as_str(), d.contact_name.as_str(), d.address.as_str()],
                            search,
                        )
                })
                .cloned()
                .collect();
            Ok(ranked(v))
        })
    }

    async fn get_destination(&self, user_id: Id, id: Id) -> RepoResult<SavedDestination> {
        self.read(|s| owned(&s.destinations, user_id, id))
    }

    async fn create_destination(&self, user_id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
        self.transact(|s| {
            if input.is_default {
                clear_defaults(&mut s.destinations, user_id);
            }
            let now = Utc::now();
            let id = s.next_id();
            let rec = SavedDestination {
                id,
                user_id,
                nickname: input.nickname,
                business_name: input.business_name,
                business_number: input.business_number,
                contact_name: input.contact_name,
                phone1: input.phone1,
                phone2: input.phone2,
                address: input.address,
                address_detail: input.address_detail,
                is_default: input.is_default,
                usage_count: 0,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            };
            s.destinations.insert(id, rec.clone());
            Ok(rec)
        })
    }

    async fn update_destination(&self, user_id: Id, id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
        self.transact(|s| {
            let mut rec = owned(&s.destinations, user_id, id)?;
            if input.is_default {
                clear_defaults(&mut s.destinations, user_id);
            }
            rec.nickname = input.nickname;
            rec.business_name = input.business_name;
            rec.business_number = input.business_number;
            rec.contact_name = input.contact_name;
            rec.phone1 = input.phone1;
            rec.phone2 = input.phone2;
            rec.address = input.address;
            rec.address_detail = input.address_detail;
            rec.is_default = input.is_default;
            rec.updated_at = Utc::now();
            s.destinations.insert(id, rec.clone());
            Ok(rec)
        })
    }

    async fn delete_destination(&self, user_id: Id, id: Id) -> RepoResult<()> {
        self.transact(|s| {
            owned(&s.destinations, user_id, id)?;
            s.destinations.remove(&id);
            Ok(())
        })
    }
}

#[async_trait]
impl RecentItemRepo for InMemRepo {
    async fn list_recent_items(&self, user_id: Id, search: Option<&str>, limit: u32) -> RepoResult<Vec<RecentItem>> {
        self.read(|s| {
            let mut v: Vec<_> = s
                .recent_items
                .values()
                .filter(|r| r.user_id == user_id && contains_ci(&[r.item_name.as_str(), r.item_spec.as_str()], search))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then(b.last_used_at.cmp(&a.last_used_at)));
            v.truncate(limit as usize);
            Ok(v)
        })
    }
}
