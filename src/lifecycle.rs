//! Order lifecycle: status graph, public-link secrets and the pure decisions
//! behind every owner / recipient action. Nothing in here touches storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Id, Order};

/// Days a public order link stays valid after creation.
pub const TOKEN_TTL_DAYS: i64 = 30;
/// Extra order-number candidates tried when the first one is taken.
pub const ORDER_NUMBER_RETRIES: usize = 5;
/// `changed_by` marker for actions taken through the public link.
pub const RECIPIENT: &str = "recipient";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres-store", sqlx(type_name = "order_status", rename_all = "UPPERCASE"))]
pub enum OrderStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Rejected,
    Reviewing,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Draft,
        OrderStatus::Sent,
        OrderStatus::Viewed,
        OrderStatus::Accepted,
        OrderStatus::Rejected,
        OrderStatus::Reviewing,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Sent => "SENT",
            OrderStatus::Viewed => "VIEWED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Reviewing => "REVIEWING",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses reachable through the public link at all.
    pub fn is_public(self) -> bool {
        !matches!(self, OrderStatus::Draft | OrderStatus::Cancelled)
    }

    /// Recipient may still answer.
    pub fn awaits_response(self) -> bool {
        matches!(self, OrderStatus::Sent | OrderStatus::Viewed)
    }

    pub fn is_recipient_response(self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::Rejected | OrderStatus::Reviewing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LifecycleError::UnknownStatus(s.to_string()))
    }
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Owner(Id),
    Recipient,
}

impl Actor {
    /// Value stored in `OrderHistory::changed_by`.
    pub fn changed_by(self) -> String {
        match self {
            Actor::Owner(id) => id.to_string(),
            Actor::Recipient => RECIPIENT.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("sent orders cannot be modified")]
    NotEditable,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("unknown order status '{0}'")]
    UnknownStatus(String),
    #[error("order not found")]
    NotPublic,
    #[error("the order link has expired")]
    TokenExpired,
    #[error("verification code does not match")]
    CodeMismatch,
    #[error("order has already been processed")]
    AlreadyProcessed,
}

/// Transition table. Self-transitions are never allowed.
pub fn allowed(from: OrderStatus, to: OrderStatus, actor: Actor) -> bool {
    use OrderStatus::*;
    match (from, to, actor) {
        (Draft, Sent, Actor::Owner(_)) => true,
        (Sent, Viewed, Actor::Recipient) => true,
        (Sent | Viewed, Accepted | Rejected | Reviewing, Actor::Recipient) => true,
        (Sent | Viewed | Accepted | Rejected | Reviewing, Cancelled, Actor::Owner(_)) => true,
        _ => false,
    }
}

fn ensure_allowed(from: OrderStatus, to: OrderStatus, actor: Actor) -> Result<(), LifecycleError> {
    if allowed(from, to, actor) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// Statuses an order may be created in.
pub fn initial_status(requested: Option<OrderStatus>) -> Result<OrderStatus, LifecycleError> {
    match requested.unwrap_or(OrderStatus::Draft) {
        st @ (OrderStatus::Draft | OrderStatus::Sent) => Ok(st),
        other => Err(LifecycleError::InvalidTransition { from: OrderStatus::Draft, to: other }),
    }
}

/// `YYYYMMDD-XXXX`, suffix drawn from upper-case base-36.
pub fn generate_order_number(today: NaiveDate) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", today.format("%Y%m%d"), suffix)
}

/// Opaque secret embedded in the public order URL.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Last four digits of the phone number, separators ignored.
/// `None` when fewer than four digits are present.
pub fn verification_code(phone: &str) -> Option<String> {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

/// Phone number with the digits that make up the verification code starred.
pub fn mask_phone(phone: &str) -> String {
    let mut hidden = 0;
    let mut out: Vec<char> = phone
        .chars()
        .rev()
        .map(|c| {
            if hidden < 4 && c.is_ascii_digit() {
                hidden += 1;
                '*'
            } else {
                c
            }
        })
        .collect();
    out.reverse();
    out.into_iter().collect()
}

pub fn token_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(TOKEN_TTL_DAYS)
}

/// Gate shared by every token-addressed read and write: hidden statuses look
/// like a missing order, expiry is reported separately.
pub fn check_public_access(order: &Order, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if !order.status.is_public() {
        return Err(LifecycleError::NotPublic);
    }
    if now > order.token_expires_at {
        return Err(LifecycleError::TokenExpired);
    }
    Ok(())
}

/// Status to record after an owner edit. `None` means the status is unchanged.
pub fn owner_update(
    current: OrderStatus,
    requested: Option<OrderStatus>,
    owner: Id,
) -> Result<Option<OrderStatus>, LifecycleError> {
    if current != OrderStatus::Draft {
        return Err(LifecycleError::NotEditable);
    }
    match requested {
        None => Ok(None),
        Some(to) if to == current => Ok(None),
        Some(to) => {
            ensure_allowed(current, to, Actor::Owner(owner))?;
            Ok(Some(to))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    /// Never sent: remove the order, its items and history.
    Purge,
    /// Sent at some point: keep the record, mark it cancelled.
    Cancel,
    /// Already cancelled; nothing to do.
    Noop,
}

pub fn owner_delete(current: OrderStatus, owner: Id) -> DeleteAction {
    match current {
        OrderStatus::Draft => DeleteAction::Purge,
        OrderStatus::Cancelled => DeleteAction::Noop,
        st if allowed(st, OrderStatus::Cancelled, Actor::Owner(owner)) => DeleteAction::Cancel,
        _ => DeleteAction::Noop,
    }
}

/// Checks a submitted code. Returns the status to move to on first view.
pub fn recipient_verify(
    order: &Order,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<OrderStatus>, LifecycleError> {
    check_public_access(order, now)?;
    if order.verification_code != code {
        return Err(LifecycleError::CodeMismatch);
    }
    if allowed(order.status, OrderStatus::Viewed, Actor::Recipient) {
        Ok(Some(OrderStatus::Viewed))
    } else {
        Ok(None)
    }
}

pub fn recipient_respond(
    order: &Order,
    response: OrderStatus,
    now: DateTime<Utc>,
) -> Result<OrderStatus, LifecycleError> {
    check_public_access(order, now)?;
    if !order.status.awaits_response() {
        return Err(LifecycleError::AlreadyProcessed);
    }
    ensure_allowed(order.status, response, Actor::Recipient)?;
    Ok(response)
}
