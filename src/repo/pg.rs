use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, Pool, Postgres};

use super::*;

const ORDER_COLUMNS: &str = "id, user_id, order_number, recipient_name, recipient_business_name, \
    recipient_business_number, recipient_phone1, recipient_phone2, recipient_address, \
    recipient_address_detail, delivery_date, delivery_time, memo, status, token, token_expires_at, \
    verification_code, view_count, last_viewed_at, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, item_code, item_name, item_spec, quantity, unit, sort_order";

const ADDRESS_COLUMNS: &str =
    "id, user_id, nickname, address, address_detail, is_default, usage_count, last_used_at, created_at, updated_at";

const DESTINATION_COLUMNS: &str = "id, user_id, nickname, business_name, business_number, contact_name, \
    phone1, phone2, address, address_detail, is_default, usage_count, last_used_at, created_at, updated_at";

/// Same ranking as the in-memory store: default, usage, recency.
const SAVED_ORDER_BY: &str = "ORDER BY is_default DESC, usage_count DESC, last_used_at DESC NULLS LAST, id DESC";

/// Client-facing text for a unique violation. Constraint names stay internal.
fn conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "email already registered",
        Some("orders_order_number_key") => "order number already exists",
        Some("saved_addresses_one_default" | "saved_destinations_one_default") => "another default was saved at the same time",
        _ => "record already exists",
    }
}

fn db_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(ref d) if d.code().as_deref() == Some("23505") => {
            tracing::debug!(constraint = ?d.constraint(), "unique violation");
            RepoError::Conflict(conflict_message(d.constraint()).to_string())
        }
        other => RepoError::Internal(other.to_string()),
    }
}

fn like_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")))
}

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn items_for(&self, order_ids: &[Id]) -> RepoResult<HashMap<Id, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, sort_order"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut grouped: HashMap<Id, Vec<OrderItem>> = HashMap::new();
        for item in rows {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn view(&self, order: Order) -> RepoResult<OrderView> {
        let mut items = self.items_for(&[order.id]).await?;
        Ok(OrderView { items: items.remove(&order.id).unwrap_or_default(), order })
    }
}

async fn insert_items(conn: &mut PgConnection, order_id: Id, items: &[NewOrderItem]) -> RepoResult<()> {
    for (idx, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (order_id, item_code, item_name, item_spec, quantity, unit, sort_order) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(order_id)
        .bind(&item.item_code)
        .bind(&item.item_name)
        .bind(&item.item_spec)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(idx as i32)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

async fn insert_history(conn: &mut PgConnection, order_id: Id, h: &NewHistory) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO order_histories (order_id, status, reason, changed_by, ip_address, user_agent) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(order_id)
    .bind(h.status)
    .bind(&h.reason)
    .bind(&h.changed_by)
    .bind(&h.ip_address)
    .bind(&h.user_agent)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (email, password_hash, name, business_name, phone) VALUES ($1,$2,$3,$4,$5) \
             RETURNING id, email, password_hash, name, business_name, phone, created_at",
        )
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(&new.business_name)
        .bind(&new.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, name, business_name, phone, created_at FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, name, business_name, phone, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl OrderRepo for PgRepo {
    async fn order_number_exists(&self, order_number: &str) -> RepoResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM orders WHERE order_number = $1)")
            .bind(order_number)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_order(&self, new: NewOrder) -> RepoResult<OrderView> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let f = &new.fields;
        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (user_id, order_number, recipient_name, recipient_business_name, \
             recipient_business_number, recipient_phone1, recipient_phone2, recipient_address, \
             recipient_address_detail, delivery_date, delivery_time, memo, status, token, token_expires_at, \
             verification_code) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(new.user_id)
        .bind(&new.order_number)
        .bind(&f.recipient_name)
        .bind(&f.recipient_business_name)
        .bind(&f.recipient_business_number)
        .bind(&f.recipient_phone1)
        .bind(&f.recipient_phone2)
        .bind(&f.recipient_address)
        .bind(&f.recipient_address_detail)
        .bind(f.delivery_date)
        .bind(&f.delivery_time)
        .bind(&f.memo)
        .bind(new.status)
        .bind(&new.token)
        .bind(new.token_expires_at)
        .bind(&new.verification_code)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        insert_items(&mut tx, order.id, &new.items).await?;
        insert_history(&mut tx, order.id, &NewHistory {
            status: new.status,
            reason: None,
            changed_by: new.user_id.to_string(),
            ip_address: None,
            user_agent: None,
        })
        .await?;

        for item in &new.items {
            sqlx::query(
                "INSERT INTO recent_items (user_id, item_code, item_name, item_spec, unit) VALUES ($1,$2,$3,$4,$5) \
                 ON CONFLICT (user_id, item_name, item_spec) DO UPDATE SET \
                 usage_count = recent_items.usage_count + 1, last_used_at = now(), \
                 item_code = EXCLUDED.item_code, unit = EXCLUDED.unit",
            )
            .bind(new.user_id)
            .bind(&item.item_code)
            .bind(&item.item_name)
            .bind(item.item_spec.clone().unwrap_or_default())
            .bind(&item.unit)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        if let Some(dest_id) = new.destination_id {
            sqlx::query("UPDATE saved_destinations SET usage_count = usage_count + 1, last_used_at = now() WHERE id = $1 AND user_id = $2")
                .bind(dest_id)
                .bind(new.user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        if let Some(addr_id) = new.address_id {
            sqlx::query("UPDATE saved_addresses SET usage_count = usage_count + 1, last_used_at = now() WHERE id = $1 AND user_id = $2")
                .bind(addr_id)
                .bind(new.user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        self.view(order).await
    }

    async fn list_orders(&self, user_id: Id, filter: &OrderFilter) -> RepoResult<(Vec<OrderView>, u64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND ($2::order_status IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(filter.status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND ($2::order_status IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(filter.status)
        .bind(i64::from(filter.limit))
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids: Vec<Id> = orders.iter().map(|o| o.id).collect();
        let mut items = self.items_for(&ids).await?;
        let views = orders
            .into_iter()
            .map(|order| OrderView { items: items.remove(&order.id).unwrap_or_default(), order })
            .collect();
        Ok((views, total.max(0) as u64))
    }

    async fn get_order(&self, user_id: Id, id: Id) -> RepoResult<OrderDetail> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let histories = sqlx::query_as::<_, OrderHistory>(
            "SELECT id, order_id, status, reason, changed_by, ip_address, user_agent, created_at \
             FROM order_histories WHERE order_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let view = self.view(order).await?;
        Ok(OrderDetail { order: view.order, items: view.items, histories })
    }

    async fn find_order_by_token(&self, token: &str) -> RepoResult<OrderView> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE token = $1"))
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        self.view(order).await
    }

    async fn apply_order_plan(&self, scope: OrderScope, planner: OrderPlanner) -> RepoResult<PlanOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let locked = match &scope {
            OrderScope::Owned { user_id, id } => {
                sqlx::query_as::<_, Order>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE"
                ))
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
            }
            OrderScope::Token(token) => {
                sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE token = $1 FOR UPDATE"))
                    .bind(token)
                    .fetch_optional(&mut *tx)
                    .await
            }
        }
        .map_err(db_err)?;
        let current = locked.ok_or(RepoError::NotFound)?;
        // dropping `tx` on the error paths below rolls everything back
        let plan = planner(&current)?;
        let id = current.id;

        if plan.delete {
            sqlx::query("DELETE FROM orders WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            return Ok(PlanOutcome::Purged);
        }

        let mut next = current;
        plan.apply_to(&mut next, Utc::now());
        sqlx::query(
            "UPDATE orders SET recipient_name = $2, recipient_business_name = $3, recipient_business_number = $4, \
             recipient_phone1 = $5, recipient_phone2 = $6, recipient_address = $7, recipient_address_detail = $8, \
             delivery_date = $9, delivery_time = $10, memo = $11, status = $12, view_count = $13, \
             last_viewed_at = $14, updated_at = $15 WHERE id = $1",
        )
        .bind(id)
        .bind(&next.recipient_name)
        .bind(&next.recipient_business_name)
        .bind(&next.recipient_business_number)
        .bind(&next.recipient_phone1)
        .bind(&next.recipient_phone2)
        .bind(&next.recipient_address)
        .bind(&next.recipient_address_detail)
        .bind(next.delivery_date)
        .bind(&next.delivery_time)
        .bind(&next.memo)
        .bind(next.status)
        .bind(next.view_count)
        .bind(next.last_viewed_at)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(items) = &plan.items {
            sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            insert_items(&mut tx, id, items).await?;
        }
        if let Some(h) = &plan.history {
            insert_history(&mut tx, id, h).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(PlanOutcome::Saved(self.view(next).await?))
    }
}

#[async_trait]
impl AddressRepo for PgRepo {
    async fn list_addresses(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedAddress>> {
        sqlx::query_as::<_, SavedAddress>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM saved_addresses WHERE user_id = $1 \
             AND ($2::text IS NULL OR nickname ILIKE $2 OR address ILIKE $2) {SAVED_ORDER_BY}"
        ))
        .bind(user_id)
        .bind(like_pattern(search))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_address(&self, user_id: Id, id: Id) -> RepoResult<SavedAddress> {
        sqlx::query_as::<_, SavedAddress>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM saved_addresses WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn create_address(&self, user_id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if input.is_default {
            sqlx::query("UPDATE saved_addresses SET is_default = false WHERE user_id = $1 AND is_default")
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        let rec = sqlx::query_as::<_, SavedAddress>(&format!(
            "INSERT INTO saved_addresses (user_id, nickname, address, address_detail, is_default) \
             VALUES ($1,$2,$3,$4,$5) RETURNING {ADDRESS_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&input.nickname)
        .bind(&input.address)
        .bind(&input.address_detail)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(rec)
    }

    async fn update_address(&self, user_id: Id, id: Id, input: AddressInput) -> RepoResult<SavedAddress> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if input.is_default {
            sqlx::query("UPDATE saved_addresses SET is_default = false WHERE user_id = $1 AND id <> $2 AND is_default")
                .bind(user_id)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        let rec = sqlx::query_as::<_, SavedAddress>(&format!(
            "UPDATE saved_addresses SET nickname = $3, address = $4, address_detail = $5, is_default = $6, \
             updated_at = now() WHERE id = $1 AND user_id = $2 RETURNING {ADDRESS_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(&input.nickname)
        .bind(&input.address)
        .bind(&input.address_detail)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(rec)
    }

    async fn delete_address(&self, user_id: Id, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM saved_addresses WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationRepo for PgRepo {
    async fn list_destinations(&self, user_id: Id, search: Option<&str>) -> RepoResult<Vec<SavedDestination>> {
        sqlx::query_as::<_, SavedDestination>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM saved_destinations WHERE user_id = $1 \
             AND ($2::text IS NULL OR nickname ILIKE $2 OR business_name ILIKE $2 \
                  OR contact_name ILIKE $2 OR address ILIKE $2) {SAVED_ORDER_BY}"
        ))
        .bind(user_id)
        .bind(like_pattern(search))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_destination(&self, user_id: Id, id: Id) -> RepoResult<SavedDestination> {
        sqlx::query_as::<_, SavedDestination>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM saved_destinations WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn create_destination(&self, user_id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if input.is_default {
            sqlx::query("UPDATE saved_destinations SET is_default = false WHERE user_id = $1 AND is_default")
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        let rec = sqlx::query_as::<_, SavedDestination>(&format!(
            "INSERT INTO saved_destinations (user_id, nickname, business_name, business_number, contact_name, \
             phone1, phone2, address, address_detail, is_default) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) \
             RETURNING {DESTINATION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&input.nickname)
        .bind(&input.business_name)
        .bind(&input.business_number)
        .bind(&input.contact_name)
        .bind(&input.phone1)
        .bind(&input.phone2)
        .bind(&input.address)
        .bind(&input.address_detail)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(rec)
    }

    async fn update_destination(&self, user_id: Id, id: Id, input: DestinationInput) -> RepoResult<SavedDestination> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if input.is_default {
            sqlx::query("UPDATE saved_destinations SET is_default = false WHERE user_id = $1 AND id <> $2 AND is_default")
                .bind(user_id)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        let rec = sqlx::query_as::<_, SavedDestination>(&format!(
            "UPDATE saved_destinations SET nickname = $3, business_name = $4, business_number = $5, \
             contact_name = $6, phone1 = $7, phone2 = $8, address = $9, address_detail = $10, is_default = $11, \
             updated_at = now() WHERE id = $1 AND user_id = $2 RETURNING {DESTINATION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(&input.nickname)
        .bind(&input.business_name)
        .bind(&input.business_number)
        .bind(&input.contact_name)
        .bind(&input.phone1)
        .bind(&input.phone2)
        .bind(&input.address)
        .bind(&input.address_detail)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(rec)
    }

    async fn delete_destination(&self, user_id: Id, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM saved_destinations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl RecentItemRepo for PgRepo {
    async fn list_recent_items(&self, user_id: Id, search: Option<&str>, limit: u32) -> RepoResult<Vec<RecentItem>> {
        sqlx::query_as::<_, RecentItem>(
            "SELECT id, user_id, item_code, item_name, item_spec, unit, usage_count, last_used_at \
             FROM recent_items WHERE user_id = $1 AND ($2::text IS NULL OR item_name ILIKE $2 OR item_spec ILIKE $2) \
             ORDER BY usage_count DESC, last_used_at DESC LIMIT $3",
        )
        .bind(user_id)
        .bind(like_pattern(search))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::conflict_message;

    #[test]
    fn conflicts_never_echo_constraint_names() {
        assert_eq!(conflict_message(Some("users_email_key")), "email already registered");
        assert_eq!(conflict_message(Some("orders_order_number_key")), "order number already exists");
        for name in [Some("orders_token_key"), Some("recent_items_user_id_item_name_item_spec_key"), None] {
            let msg = conflict_message(name);
            assert_eq!(msg, "record already exists");
            assert!(!msg.contains("_key"));
        }
    }
}
