//! PostgreSQL stores
//!
//! Runtime queries (no compile-time database connection). Transfer legs and the
//! extension map are stored as JSONB; the extension keeps its flat string-map
//! form at this boundary. Schema: `migrations/001_relay_orders.sql`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use super::{FlowStore, MAX_FLOW_ENTRIES, OrderStore, StoreError};
use crate::order::{FlowExtension, Order, OrderStatus, StatusFlowEntry, now_millis};

/// Open a connection pool for the relay stores
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("PostgreSQL connection pool established");
    Ok(pool)
}

const ORDER_COLUMNS: &str = r#"order_id, user_id, order_type, third_party_service, third_party_order_id,
       status, from_transfer::text AS from_transfer, to_transfer::text AS to_transfer,
       extension::text AS extension, create_time, last_modify_time, expire_time,
       arrival_time, from_raw_transaction"#;

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
        let parse_err = |e: String| StoreError::Serialization(e);

        let order_id: String = row.try_get("order_id")?;
        let order_type: String = row.try_get("order_type")?;
        let status: String = row.try_get("status")?;
        let from_transfer: String = row.try_get("from_transfer")?;
        let to_transfer: String = row.try_get("to_transfer")?;
        let extension: String = row.try_get("extension")?;
        let user_id: i64 = row.try_get("user_id")?;

        Ok(Order {
            id: Uuid::parse_str(&order_id).map_err(|e| parse_err(e.to_string()))?,
            user_id: user_id as u64,
            order_type: order_type.parse().map_err(parse_err)?,
            third_party_order_id: row.try_get("third_party_order_id")?,
            third_party_service: row.try_get("third_party_service")?,
            from_transfer: serde_json::from_str(&from_transfer)?,
            to_transfer: serde_json::from_str(&to_transfer)?,
            status: status.parse().map_err(parse_err)?,
            extension: serde_json::from_str(&extension)?,
            create_time: row.try_get("create_time")?,
            last_modify_time: row.try_get("last_modify_time")?,
            expire_time: row.try_get("expire_time")?,
            arrival_time: row.try_get("arrival_time")?,
            from_raw_transaction: row.try_get("from_raw_transaction")?,
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_if_absent(&self, order: &Order) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO relay_orders (
                order_id, user_id, order_type, third_party_service, third_party_order_id,
                status, from_transfer, to_transfer, extension, create_time,
                last_modify_time, expire_time, arrival_time, from_raw_transaction
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9::jsonb, $10, $11, $12, $13, $14)
            ON CONFLICT (third_party_service, third_party_order_id) DO NOTHING
            "#,
        )
        .bind(order.id.to_string())
        .bind(order.user_id as i64)
        .bind(order.order_type.as_str())
        .bind(&order.third_party_service)
        .bind(&order.third_party_order_id)
        .bind(order.status.as_str())
        .bind(serde_json::to_string(&order.from_transfer)?)
        .bind(serde_json::to_string(&order.to_transfer)?)
        .bind(serde_json::to_string(&order.extension)?)
        .bind(order.create_time)
        .bind(order.last_modify_time)
        .bind(order.expire_time)
        .bind(order.arrival_time)
        .bind(&order.from_raw_transaction)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM relay_orders WHERE order_id = $1", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn get_by_third_party_id(
        &self,
        service: &str,
        third_party_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM relay_orders WHERE third_party_service = $1 AND third_party_order_id = $2",
            ORDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(service)
            .bind(third_party_order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE relay_orders
            SET status = $2, from_transfer = $3::jsonb, to_transfer = $4::jsonb,
                extension = $5::jsonb, last_modify_time = $6, expire_time = $7,
                arrival_time = $8, from_raw_transaction = $9
            WHERE order_id = $1
            "#,
        )
        .bind(order.id.to_string())
        .bind(order.status.as_str())
        .bind(serde_json::to_string(&order.from_transfer)?)
        .bind(serde_json::to_string(&order.to_transfer)?)
        .bind(serde_json::to_string(&order.extension)?)
        .bind(order.last_modify_time)
        .bind(order.expire_time)
        .bind(order.arrival_time)
        .bind(&order.from_raw_transaction)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order.id));
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM relay_orders WHERE status NOT IN ('Finish', 'Expired', 'Failed') ORDER BY create_time ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_order).collect()
    }
}

pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> Result<StatusFlowEntry, StoreError> {
        let status: String = row.try_get("status")?;
        let extension: Option<String> = row.try_get("extension")?;
        Ok(StatusFlowEntry {
            status: status.parse().map_err(StoreError::Serialization)?,
            timestamp: row.try_get("ts")?,
            extension: extension
                .map(|e| serde_json::from_str::<FlowExtension>(&e))
                .transpose()?,
        })
    }

    async fn read_with<'e, E>(executor: E, order_id: Uuid) -> Result<Vec<StatusFlowEntry>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query(
            r#"SELECT status, ts, extension::text AS extension
               FROM relay_status_flow
               WHERE order_id = $1
               ORDER BY seq ASC"#,
        )
        .bind(order_id.to_string())
        .fetch_all(executor)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[async_trait]
impl FlowStore for PgFlowStore {
    async fn append(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extension: Option<FlowExtension>,
    ) -> Result<Vec<StatusFlowEntry>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize appends per order for the count-then-insert below
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(order_id.to_string())
            .execute(&mut *tx)
            .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM relay_status_flow WHERE order_id = $1")
                .bind(order_id.to_string())
                .fetch_one(&mut *tx)
                .await?;

        if count as usize >= MAX_FLOW_ENTRIES {
            return Err(StoreError::FlowCapExceeded {
                order_id,
                cap: MAX_FLOW_ENTRIES,
            });
        }

        let extension = extension.map(|e| serde_json::to_string(&e)).transpose()?;
        sqlx::query(
            r#"INSERT INTO relay_status_flow (order_id, seq, status, ts, extension)
               VALUES ($1, $2, $3, $4, $5::jsonb)"#,
        )
        .bind(order_id.to_string())
        .bind(count as i32)
        .bind(status.as_str())
        .bind(now_millis())
        .bind(extension)
        .execute(&mut *tx)
        .await?;

        let flow = Self::read_with(&mut *tx, order_id).await?;
        tx.commit().await?;
        Ok(flow)
    }

    async fn read(&self, order_id: Uuid) -> Result<Vec<StatusFlowEntry>, StoreError> {
        Self::read_with(&self.pool, order_id).await
    }
}
