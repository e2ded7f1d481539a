use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::lifecycle::LifecycleError;
use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    /// The lifecycle refused the change; nothing was written.
    #[error(transparent)]
    Rejected(#[from] LifecycleError),
    #[error("storage error: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// How an order is addressed: by its owner, or through the public link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderScope {
    Owned { user_id: Id, id: Id },
    Token(String),
}

/// One unit of work against a single order. Produced by a planner from the
/// locked current row and applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPlan {
    /// Remove the order with its items and history; other fields are ignored.
    pub delete: bool,
    pub patch: Option<OrderPatch>,
    pub status: Option<OrderStatus>,
    /// Full replacement of the item list.
    pub items: Option<Vec<NewOrderItem>>,
    pub history: Option<NewHistory>,
    /// Count a successful recipient view at this instant.
    pub viewed_at: Option<DateTime<Utc>>,
}

impl OrderPlan {
    pub fn purge() -> Self {
        Self { delete: true, ..Default::default() }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Row-level effect of the plan (everything except items and history).
    pub fn apply_to(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(patch) = &self.patch {
            patch.apply_to(order);
        }
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(at) = self.viewed_at {
            order.view_count += 1;
            order.last_viewed_at = Some(at);
        }
        if self.patch.is_some() || self.status.is_some() || self.items.is_some() {
            order.updated_at = now;
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Saved(OrderView),
    Purged,
}

pub type OrderPlanner = Box<dyn FnOnce(&Order) -> Result<OrderPlan, LifecycleError> + Send>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait OrderRepo: Send + Sync {
    async fn order_number_exists(&self, order_number: &str) -> RepoResult<bool>;
    /// Inserts order, items, the initial history row and the recent-item /
    /// saved-record usage bumps in one unit of work.
    async fn create_order(&self, new: NewOrder) -> RepoResult<OrderView>;
    async fn list_orders(&self, user_id: Id, filter: &OrderFilter) -> RepoResult<(Vec<OrderView>, u64)>;
    async fn get_order(&self, user_id: Id, id: Id) -> RepoResult<OrderDetail>;
    async fn find_order_by_token(&self, token: &str) -> RepoResult<OrderView>;
    /// Locks the order, asks `planner` what to do and applies the plan
    /// atomically. A planner error aborts without any write.
    async fn apply_order_plan(&self, scope: OrderScope, planner: OrderPlanner) -> RepoResult<PlanOutcome>;
}

#[async_trait]
pub trait AddressRepo: Send + Sync {
    async fn list_addresses(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedAddress>>;
    async fn get_address(&self, user_id: Id, id: Id) -> RepoResult<SavedAddress>;
    async fn create_address(&self, user_id: Id, input: AddressInput) -> RepoResult<SavedAddress>;
    async fn update_address(&self, user_id: Id, id: Id, input: AddressInput) -> RepoResult<SavedAddress>;
    async fn delete_address(&self, user_id: Id, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait DestinationRepo: Send + Sync {
    async fn list_destinations(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedDestination>>;
    async fn get_destination(&self, user_id: Id, id: Id) -> RepoResult<SavedDestination>;
    async fn create_destination(&self, user_id: Id, input: DestinationInput) -> RepoResult<SavedDestination>;
    async fn update_destination(&self, user_id: Id, id: Id, input: DestinationInput) -> RepoResult<SavedDestination>;
    async fn delete_destination(&self, user_id: Id, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait RecentItemRepo: Send + Sync {
    async fn list_recent_items(&self, user_id: Id, search: Option<&str>, limit: u32) -> RepoResult<Vec<RecentItem>>;
}

pub trait Repo: UserRepo + OrderRepo + AddressRepo + DestinationRepo + RecentItemRepo {}

impl<T> Repo for T where T: UserRepo + OrderRepo + AddressRepo + DestinationRepo + RecentItemRepo {}
