//! Leasing repository
//!
//! Read access to contracts and their containers for the billing run, plus
//! the writes leasing operations use to register pickups and returns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

/// Repository over `leasing_contracts` and `contract_containers`
#[derive(Debug, Clone)]
pub struct LeasingRepository {
    pool: PgPool,
}

impl LeasingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active contracts past `now`'s free-day boundary joined with each of
    /// their picked-up, unreturned containers
    ///
    /// A contract with three outstanding containers yields three rows.
    pub async fn find_overdue_with_unreturned_containers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<OverdueContainerRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, OverdueContainerRow>(
            r#"
            SELECT
                lc.contract_id, lc.user_id, lc.contract_number, lc.container_size,
                lc.quantity, lc.free_days, lc.per_diem_rate, lc.start_date, lc.end_date,
                lc.status, lc.origin, lc.destination, lc.total_value,
                lc.created_at, lc.updated_at,
                cc.container_id,
                cc.container_number,
                cc.container_type,
                cc.pickup_location,
                cc.price AS container_price,
                cc.status AS container_status,
                cc.pickup_date,
                cc.return_date,
                cc.notes
            FROM leasing_contracts lc
            JOIN contract_containers cc ON cc.contract_id = lc.contract_id
            WHERE lc.status = 'active'
              AND lc.end_date < $1
              AND cc.status = 'picked_up'
              AND cc.return_date IS NULL
            ORDER BY lc.end_date, lc.contract_number, cc.container_number
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Picked-up, unreturned containers of one contract
    pub async fn find_unreturned_containers(
        &self,
        contract_id: Uuid,
    ) -> Result<Vec<ContainerRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, ContainerRow>(
            r#"
            SELECT container_id, contract_id, container_number, container_type,
                   pickup_location, price, status, pickup_date, return_date, notes
            FROM contract_containers
            WHERE contract_id = $1
              AND status = 'picked_up'
              AND return_date IS NULL
            ORDER BY container_number
            "#,
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn find_contract(&self, contract_id: Uuid) -> Result<Option<ContractRow>, DatabaseError> {
        let row = sqlx::query_as::<_, ContractRow>(
            r#"
            SELECT contract_id, user_id, contract_number, container_size, quantity,
                   free_days, per_diem_rate, start_date, end_date, status, origin,
                   destination, total_value, created_at, updated_at
            FROM leasing_contracts
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn insert_contract(&self, row: &ContractRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO leasing_contracts (
                contract_id, user_id, contract_number, container_size, quantity,
                free_days, per_diem_rate, start_date, end_date, status, origin,
                destination, total_value, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(row.contract_id)
        .bind(row.user_id)
        .bind(&row.contract_number)
        .bind(&row.container_size)
        .bind(row.quantity)
        .bind(row.free_days)
        .bind(row.per_diem_rate)
        .bind(row.start_date)
        .bind(row.end_date)
        .bind(row.status)
        .bind(&row.origin)
        .bind(&row.destination)
        .bind(row.total_value)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_container(&self, row: &ContainerRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO contract_containers (
                container_id, contract_id, container_number, container_type,
                pickup_location, price, status, pickup_date, return_date, notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.container_id)
        .bind(row.contract_id)
        .bind(&row.container_number)
        .bind(&row.container_type)
        .bind(&row.pickup_location)
        .bind(row.price)
        .bind(row.status)
        .bind(row.pickup_date)
        .bind(row.return_date)
        .bind(&row.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records the return of a container
    ///
    /// # Errors
    ///
    /// `DatabaseError::NotFound` when no outstanding container has that id
    pub async fn mark_container_returned(
        &self,
        container_id: Uuid,
        returned_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE contract_containers
            SET status = 'returned', return_date = $2
            WHERE container_id = $1 AND status <> 'returned'
            "#,
        )
        .bind(container_id)
        .bind(returned_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("ContractContainer", container_id));
        }
        Ok(())
    }
}

/// `leasing_contracts` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContractRow {
    pub contract_id: Uuid,
    pub user_id: Uuid,
    pub contract_number: String,
    pub container_size: String,
    pub quantity: i32,
    pub free_days: i32,
    pub per_diem_rate: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ContractStatus,
    pub origin: String,
    pub destination: String,
    pub total_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `contract_containers` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContainerRow {
    pub container_id: Uuid,
    pub contract_id: Uuid,
    pub container_number: String,
    pub container_type: String,
    pub pickup_location: String,
    pub price: Decimal,
    pub status: ContainerStatus,
    pub pickup_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// One contract/container pair from the overdue join
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OverdueContainerRow {
    pub contract_id: Uuid,
    pub user_id: Uuid,
    pub contract_number: String,
    pub container_size: String,
    pub quantity: i32,
    pub free_days: i32,
    pub per_diem_rate: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ContractStatus,
    pub origin: String,
    pub destination: String,
    pub total_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub container_id: Uuid,
    pub container_number: String,
    pub container_type: String,
    pub pickup_location: String,
    pub container_price: Decimal,
    pub container_status: ContainerStatus,
    pub pickup_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl OverdueContainerRow {
    /// Splits the joined row into its two halves
    pub fn split(self) -> (ContractRow, ContainerRow) {
        let container = ContainerRow {
            container_id: self.container_id,
            contract_id: self.contract_id,
            container_number: self.container_number,
            container_type: self.container_type,
            pickup_location: self.pickup_location,
            price: self.container_price,
            status: self.container_status,
            pickup_date: self.pickup_date,
            return_date: self.return_date,
            notes: self.notes,
        };
        let contract = ContractRow {
            contract_id: self.contract_id,
            user_id: self.user_id,
            contract_number: self.contract_number,
            container_size: self.container_size,
            quantity: self.quantity,
            free_days: self.free_days,
            per_diem_rate: self.per_diem_rate,
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status,
            origin: self.origin,
            destination: self.destination,
            total_value: self.total_value,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (contract, container)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Expired,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "container_status", rename_all = "snake_case")]
pub enum ContainerStatus {
    PickedUp,
    InTransit,
    Returned,
}
