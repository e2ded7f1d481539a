use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use crate::lifecycle::OrderStatus;

pub type Id = i64;

// ---------------------------------------------------------------- users

/// Stored account. Never serialised to clients; see [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: Id,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Id,
    pub email: String,
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self { id: u.id, email: u.email, name: u.name, business_name: u.business_name, phone: u.phone, created_at: u.created_at }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
}

/// Supplier contact shown to recipients on the public order page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub email: String,
}

impl From<User> for Supplier {
    fn from(u: User) -> Self {
        Self { name: u.name, business_name: u.business_name, phone: u.phone, email: u.email }
    }
}

// --------------------------------------------------------------- orders

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Order {
    pub id: Id,
    pub user_id: Id,
    pub order_number: String,
    pub recipient_name: String,
    pub recipient_business_name: String,
    pub recipient_business_number: Option<String>,
    pub recipient_phone1: String,
    pub recipient_phone2: Option<String>,
    pub recipient_address: String,
    pub recipient_address_detail: Option<String>,
    pub delivery_date: NaiveDate,
    pub delivery_time: Option<String>,
    pub memo: Option<String>,
    pub status: OrderStatus,
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
    pub verification_code: String,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: Id,
    pub order_id: Id,
    pub item_code: Option<String>,
    pub item_name: String,
    pub item_spec: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct OrderHistory {
    pub id: Id,
    pub order_id: Id,
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub changed_by: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Order with its items in `sort_order`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Owner's detail view: items plus history, newest entry first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub histories: Vec<OrderHistory>,
}

/// What a recipient sees: no secrets, counters or owner identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicOrder {
    pub id: Id,
    pub order_number: String,
    pub recipient_name: String,
    pub recipient_business_name: String,
    /// Last four digits starred; they are the verification code.
    pub recipient_phone1: String,
    pub recipient_address: String,
    pub recipient_address_detail: Option<String>,
    pub delivery_date: NaiveDate,
    pub delivery_time: Option<String>,
    pub memo: Option<String>,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub supplier: Option<Supplier>,
    pub created_at: DateTime<Utc>,
}

impl PublicOrder {
    pub fn new(view: OrderView, supplier: Option<Supplier>) -> Self {
        let o = view.order;
        Self {
            id: o.id,
            order_number: o.order_number,
            recipient_name: o.recipient_name,
            recipient_business_name: o.recipient_business_name,
            recipient_phone1: crate::lifecycle::mask_phone(&o.recipient_phone1),
            recipient_address: o.recipient_address,
            recipient_address_detail: o.recipient_address_detail,
            delivery_date: o.delivery_date,
            delivery_time: o.delivery_time,
            memo: o.memo,
            status: o.status,
            items: view.items,
            supplier,
            created_at: o.created_at,
        }
    }
}

/// Editable recipient/delivery fields of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFields {
    pub recipient_name: String,
    pub recipient_business_name: String,
    pub recipient_business_number: Option<String>,
    pub recipient_phone1: String,
    pub recipient_phone2: Option<String>,
    pub recipient_address: String,
    pub recipient_address_detail: Option<String>,
    pub delivery_date: NaiveDate,
    pub delivery_time: Option<String>,
    pub memo: Option<String>,
}

/// Partial edit; `None` keeps the stored value. Optional columns take
/// `Some(None)` to clear them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub recipient_name: Option<String>,
    pub recipient_business_name: Option<String>,
    pub recipient_business_number: Option<Option<String>>,
    pub recipient_phone1: Option<String>,
    pub recipient_phone2: Option<Option<String>>,
    pub recipient_address: Option<String>,
    pub recipient_address_detail: Option<Option<String>>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_time: Option<Option<String>>,
    pub memo: Option<Option<String>>,
}

impl OrderPatch {
    pub fn apply_to(&self, o: &mut Order) {
        fn set<T: Clone>(slot: &mut T, v: &Option<T>) {
            if let Some(v) = v { *slot = v.clone(); }
        }
        set(&mut o.recipient_name, &self.recipient_name);
        set(&mut o.recipient_business_name, &self.recipient_business_name);
        set(&mut o.recipient_business_number, &self.recipient_business_number);
        set(&mut o.recipient_phone1, &self.recipient_phone1);
        set(&mut o.recipient_phone2, &self.recipient_phone2);
        set(&mut o.recipient_address, &self.recipient_address);
        set(&mut o.recipient_address_detail, &self.recipient_address_detail);
        set(&mut o.delivery_date, &self.delivery_date);
        set(&mut o.delivery_time, &self.delivery_time);
        set(&mut o.memo, &self.memo);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub item_code: Option<String>,
    pub item_name: String,
    pub item_spec: Option<String>,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistory {
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub changed_by: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Fully prepared order; every generated value is already filled in.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Id,
    pub order_number: String,
    pub fields: OrderFields,
    pub status: OrderStatus,
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
    pub verification_code: String,
    pub items: Vec<NewOrderItem>,
    /// Saved records picked in the form; their usage counters are bumped.
    pub destination_id: Option<Id>,
    pub address_id: Option<Id>,
}

#[derive(Debug, Clone)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub page: u32,
    pub limit: u32,
}

impl OrderFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

// ------------------------------------------------------- saved records

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct SavedAddress {
    pub id: Id,
    pub user_id: Id,
    pub nickname: String,
    pub address: String,
    pub address_detail: Option<String>,
    pub is_default: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressInput {
    pub nickname: String,
    pub address: String,
    pub address_detail: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct SavedDestination {
    pub id: Id,
    pub user_id: Id,
    pub nickname: String,
    pub business_name: String,
    pub business_number: Option<String>,
    pub contact_name: String,
    pub phone1: String,
    pub phone2: Option<String>,
    pub address: String,
    pub address_detail: Option<String>,
    pub is_default: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationInput {
    pub nickname: String,
    pub business_name: String,
    pub business_number: Option<String>,
    pub contact_name: String,
    pub phone1: String,
    pub phone2: Option<String>,
    pub address: String,
    pub address_detail: Option<String>,
    pub is_default: bool,
}

/// Per-user item usage, feeds the item auto-suggest.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct RecentItem {
    pub id: Id,
    pub user_id: Id,
    pub item_code: Option<String>,
    pub item_name: String,
    /// Empty string when the item has no spec; part of the unique key.
    pub item_spec: String,
    pub unit: String,
    pub usage_count: i64,
    pub last_used_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) fn test_order(status: OrderStatus, token_expires_at: DateTime<Utc>) -> Order {
    let now = Utc::now();
    Order {
        id: 1,
        user_id: 1,
        order_number: "20240101-AB12".into(),
        recipient_name: "Kim".into(),
        recipient_business_name: "Kim Foods".into(),
        recipient_business_number: None,
        recipient_phone1: "010-1234-5678".into(),
        recipient_phone2: None,
        recipient_address: "Seoul".into(),
        recipient_address_detail: None,
        delivery_date: now.date_naive(),
        delivery_time: None,
        memo: None,
        status,
        token: "t".into(),
        token_expires_at,
        verification_code: "5678".into(),
        view_count: 0,
        last_viewed_at: None,
        created_at: now,
        updated_at: now,
    }
}
