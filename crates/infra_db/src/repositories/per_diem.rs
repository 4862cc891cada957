//! Per-diem repository
//!
//! Invoices, line items, payment attempts, dunning campaigns and the payment
//! methods billing charges against. Money columns are NUMERIC next to a
//! CHAR(3) currency code.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, user_id, contract_id, invoice_number, billing_date, due_date,
    total_amount, per_diem_rate, currency, days_overdue, container_count, status,
    payment_method_id, retry_count, next_retry_at, last_failure_reason, paid_at,
    created_at, updated_at
"#;

const ATTEMPT_COLUMNS: &str = r#"
    attempt_id, invoice_id, payment_method_id, attempt_number, amount, currency,
    status, gateway_response, gateway_transaction_id, failure_reason,
    attempted_at, completed_at
"#;

const CAMPAIGN_COLUMNS: &str = r#"
    campaign_id, user_id, invoice_id, campaign_type, status, start_date, end_date,
    next_action_date, emails_sent, calls_made, notices_sent
"#;

const PAYMENT_METHOD_COLUMNS: &str = r#"
    payment_method_id, user_id, method_type, is_default, is_active, gateway_token, created_at
"#;

/// Repository for the billing ledger tables
#[derive(Debug, Clone)]
pub struct PerDiemRepository {
    pool: PgPool,
}

impl PerDiemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts an invoice and its items in one transaction
    ///
    /// # Errors
    ///
    /// `DatabaseError::DuplicateEntry` when the contract already has an
    /// invoice for that billing date or the number is taken
    pub async fn insert_invoice_with_items(
        &self,
        invoice: &InvoiceRow,
        items: &[InvoiceItemRow],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO per_diem_invoices (
                invoice_id, user_id, contract_id, invoice_number, billing_date, due_date,
                total_amount, per_diem_rate, currency, days_overdue, container_count, status,
                payment_method_id, retry_count, next_retry_at, last_failure_reason, paid_at,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.user_id)
        .bind(invoice.contract_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.billing_date)
        .bind(invoice.due_date)
        .bind(invoice.total_amount)
        .bind(invoice.per_diem_rate)
        .bind(&invoice.currency)
        .bind(invoice.days_overdue)
        .bind(invoice.container_count)
        .bind(invoice.status)
        .bind(invoice.payment_method_id)
        .bind(invoice.retry_count)
        .bind(invoice.next_retry_at)
        .bind(&invoice.last_failure_reason)
        .bind(invoice.paid_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO per_diem_invoice_items (
                    item_id, invoice_id, container_number, container_type,
                    days_overdue, per_diem_rate, line_amount, currency
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.item_id)
            .bind(item.invoice_id)
            .bind(&item.container_number)
            .bind(&item.container_type)
            .bind(item.days_overdue)
            .bind(item.per_diem_rate)
            .bind(item.line_amount)
            .bind(&item.currency)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Writes the mutable collection state of an invoice
    pub async fn update_invoice(&self, invoice: &InvoiceRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE per_diem_invoices
            SET status = $2,
                payment_method_id = $3,
                retry_count = $4,
                next_retry_at = $5,
                last_failure_reason = $6,
                paid_at = $7,
                updated_at = $8
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.status)
        .bind(invoice.payment_method_id)
        .bind(invoice.retry_count)
        .bind(invoice.next_retry_at)
        .bind(&invoice.last_failure_reason)
        .bind(invoice.paid_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("PerDiemInvoice", invoice.invoice_id));
        }
        Ok(())
    }

    pub async fn find_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRow>, DatabaseError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM per_diem_invoices WHERE invoice_id = $1");
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_invoice_for_contract_on_date(
        &self,
        contract_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<Option<InvoiceRow>, DatabaseError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM per_diem_invoices WHERE contract_id = $1 AND billing_date = $2"
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(contract_id)
            .bind(billing_date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Pending invoices whose retry is due, oldest schedule first
    pub async fn find_retriable_invoices(
        &self,
        now: DateTime<Utc>,
        max_retry_attempts: i32,
    ) -> Result<Vec<InvoiceRow>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM per_diem_invoices
            WHERE status = 'pending'
              AND next_retry_at IS NOT NULL
              AND next_retry_at < $1
              AND retry_count < $2
            ORDER BY next_retry_at, invoice_number
            "#
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(now)
            .bind(max_retry_attempts)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Invoices of a lessee billed on `[from, until)`
    pub async fn find_invoices_for_user_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<InvoiceRow>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM per_diem_invoices
            WHERE user_id = $1 AND billing_date >= $2 AND billing_date < $3
            ORDER BY billing_date, invoice_number
            "#
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(user_id)
            .bind(from)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn find_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItemRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceItemRow>(
            r#"
            SELECT item_id, invoice_id, container_number, container_type,
                   days_overdue, per_diem_rate, line_amount, currency
            FROM per_diem_invoice_items
            WHERE invoice_id = $1
            ORDER BY container_number
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_payment_method(&self, row: &PaymentMethodRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payment_methods (
                payment_method_id, user_id, method_type, is_default, is_active,
                gateway_token, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.payment_method_id)
        .bind(row.user_id)
        .bind(row.method_type)
        .bind(row.is_default)
        .bind(row.is_active)
        .bind(&row.gateway_token)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_payment_method(
        &self,
        payment_method_id: Uuid,
    ) -> Result<Option<PaymentMethodRow>, DatabaseError> {
        let sql = format!(
            "SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods WHERE payment_method_id = $1"
        );
        let row = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(payment_method_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Newest method flagged both default and active
    pub async fn find_default_active_payment_method(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PaymentMethodRow>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods
            WHERE user_id = $1 AND is_default AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn insert_payment_attempt(&self, row: &AttemptRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payment_attempts (
                attempt_id, invoice_id, payment_method_id, attempt_number, amount, currency,
                status, gateway_response, gateway_transaction_id, failure_reason,
                attempted_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(row.attempt_id)
        .bind(row.invoice_id)
        .bind(row.payment_method_id)
        .bind(row.attempt_number)
        .bind(row.amount)
        .bind(&row.currency)
        .bind(row.status)
        .bind(&row.gateway_response)
        .bind(&row.gateway_transaction_id)
        .bind(&row.failure_reason)
        .bind(row.attempted_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records the gateway's answer on a pending attempt
    pub async fn update_payment_attempt(&self, row: &AttemptRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = $2,
                gateway_response = $3,
                gateway_transaction_id = $4,
                failure_reason = $5,
                completed_at = $6
            WHERE attempt_id = $1
            "#,
        )
        .bind(row.attempt_id)
        .bind(row.status)
        .bind(&row.gateway_response)
        .bind(&row.gateway_transaction_id)
        .bind(&row.failure_reason)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("PaymentAttempt", row.attempt_id));
        }
        Ok(())
    }

    pub async fn find_payment_attempts(&self, invoice_id: Uuid) -> Result<Vec<AttemptRow>, DatabaseError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE invoice_id = $1 ORDER BY attempt_number"
        );
        let rows = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn insert_dunning_campaign(&self, row: &CampaignRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dunning_campaigns (
                campaign_id, user_id, invoice_id, campaign_type, status, start_date,
                end_date, next_action_date, emails_sent, calls_made, notices_sent
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(row.campaign_id)
        .bind(row.user_id)
        .bind(row.invoice_id)
        .bind(row.campaign_type)
        .bind(row.status)
        .bind(row.start_date)
        .bind(row.end_date)
        .bind(row.next_action_date)
        .bind(row.emails_sent)
        .bind(row.calls_made)
        .bind(row.notices_sent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_dunning_campaigns(&self, invoice_id: Uuid) -> Result<Vec<CampaignRow>, DatabaseError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM dunning_campaigns WHERE invoice_id = $1 ORDER BY start_date"
        );
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// `per_diem_invoices` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub contract_id: Uuid,
    pub invoice_number: String,
    pub billing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub per_diem_rate: Decimal,
    pub currency: String,
    pub days_overdue: i32,
    pub container_count: i32,
    pub status: InvoiceStatus,
    pub payment_method_id: Option<Uuid>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `per_diem_invoice_items` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceItemRow {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub container_number: String,
    pub container_type: String,
    pub days_overdue: i32,
    pub per_diem_rate: Decimal,
    pub line_amount: Decimal,
    pub currency: String,
}

/// `payment_methods` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentMethodRow {
    pub payment_method_id: Uuid,
    pub user_id: Uuid,
    pub method_type: PaymentMethodType,
    pub is_default: bool,
    pub is_active: bool,
    pub gateway_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `payment_attempts` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttemptRow {
    pub attempt_id: Uuid,
    pub invoice_id: Uuid,
    pub payment_method_id: Uuid,
    pub attempt_number: i32,
    pub amount: Decimal,
    pub currency: String,
    pub status: AttemptStatus,
    pub gateway_response: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `dunning_campaigns` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRow {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: Uuid,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_action_date: DateTime<Utc>,
    pub emails_sent: i32,
    pub calls_made: i32,
    pub notices_sent: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "per_diem_invoice_status", rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_method_type", rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankAccount,
    Paypal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_attempt_status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "dunning_campaign_type", rename_all = "snake_case")]
pub enum CampaignType {
    Reminder,
    Warning,
    FinalNotice,
    Collection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "dunning_campaign_status", rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}
