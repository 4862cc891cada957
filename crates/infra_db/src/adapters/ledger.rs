//! PostgreSQL Ledger Adapter
//!
//! Implements the billing engine's `LedgerStore` port on top of
//! `LeasingRepository` and `PerDiemRepository`, translating row types into
//! domain types and `DatabaseError` into `PortError`.
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresLedgerStore;
//! use domain_billing::LedgerStore;
//!
//! let store: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(pool));
//! let rows = store.find_overdue_contracts_with_unreturned_containers(Utc::now()).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{
    AdapterHealth, ContractId, Currency, DomainPort, HealthCheckResult, HealthCheckable,
    InvoiceId, Money, PaymentMethodId, PortError, UserId,
};
use domain_billing::{
    AttemptStatus, CampaignStatus, CampaignType, DunningCampaign, InvoiceStatus, LedgerStore,
    PaymentAttempt, PaymentMethod, PaymentMethodType, PerDiemInvoice, PerDiemInvoiceItem,
};
use domain_leasing::{ContainerStatus, ContractContainer, ContractStatus, LeasingContract};

use crate::repositories::leasing::{
    ContainerRow, ContainerStatus as DbContainerStatus, ContractRow,
    ContractStatus as DbContractStatus, LeasingRepository,
};
use crate::repositories::per_diem::{
    AttemptRow, AttemptStatus as DbAttemptStatus, CampaignRow,
    CampaignStatus as DbCampaignStatus, CampaignType as DbCampaignType, InvoiceItemRow,
    InvoiceRow, InvoiceStatus as DbInvoiceStatus, PaymentMethodRow,
    PaymentMethodType as DbPaymentMethodType, PerDiemRepository,
};

const ADAPTER_ID: &str = "postgres-ledger-store";

/// PostgreSQL-backed `LedgerStore`
///
/// Duplicate invoices surface as `PortError::Conflict` through the
/// `(contract_id, billing_date)` unique constraint.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    leasing: LeasingRepository,
    per_diem: PerDiemRepository,
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            leasing: LeasingRepository::new(pool.clone()),
            per_diem: PerDiemRepository::new(pool.clone()),
            pool,
        }
    }

    /// Repository used by leasing operations to register pickups and returns
    pub fn leasing(&self) -> &LeasingRepository {
        &self.leasing
    }

    /// Stores a contract; used to seed the ledger
    pub async fn insert_contract(&self, contract: &LeasingContract) -> Result<(), PortError> {
        Ok(self.leasing.insert_contract(&contract_to_row(contract)?).await?)
    }

    pub async fn insert_container(&self, container: &ContractContainer) -> Result<(), PortError> {
        Ok(self.leasing.insert_container(&container_to_row(container)).await?)
    }

    pub async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), PortError> {
        Ok(self.per_diem.insert_payment_method(&payment_method_to_row(method)).await?)
    }
}

impl DomainPort for PostgresLedgerStore {}

#[async_trait]
impl HealthCheckable for PostgresLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(_) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Healthy,
                latency_ms,
                message: None,
                checked_at: Utc::now(),
            },
            Err(e) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Unhealthy,
                latency_ms,
                message: Some(format!("Database error: {}", e)),
                checked_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self))]
    async fn find_overdue_contracts_with_unreturned_containers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(LeasingContract, ContractContainer)>, PortError> {
        let rows = self.leasing.find_overdue_with_unreturned_containers(now).await?;
        debug!(rows = rows.len(), "Loaded overdue container rows");

        rows.into_iter()
            .map(|row| {
                let (contract, container) = row.split();
                Ok((contract_from_row(contract)?, container_from_row(container)))
            })
            .collect()
    }

    #[instrument(skip(self), fields(contract_id = %contract_id))]
    async fn find_unreturned_containers(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ContractContainer>, PortError> {
        let rows = self.leasing.find_unreturned_containers(*contract_id.as_uuid()).await?;
        Ok(rows.into_iter().map(container_from_row).collect())
    }

    #[instrument(skip(self), fields(contract_id = %contract_id))]
    async fn find_invoice_for_contract_on_date(
        &self,
        contract_id: ContractId,
        billing_date: NaiveDate,
    ) -> Result<Option<PerDiemInvoice>, PortError> {
        self.per_diem
            .find_invoice_for_contract_on_date(*contract_id.as_uuid(), billing_date)
            .await?
            .map(invoice_from_row)
            .transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_default_active_payment_method(
        &self,
        user_id: UserId,
    ) -> Result<Option<PaymentMethod>, PortError> {
        Ok(self
            .per_diem
            .find_default_active_payment_method(*user_id.as_uuid())
            .await?
            .map(payment_method_from_row))
    }

    #[instrument(skip(self, invoice, items), fields(invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(
        &self,
        invoice: &PerDiemInvoice,
        items: &[PerDiemInvoiceItem],
    ) -> Result<(), PortError> {
        let item_rows = items
            .iter()
            .map(item_to_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.per_diem
            .insert_invoice_with_items(&invoice_to_row(invoice)?, &item_rows)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, invoice), fields(invoice_number = %invoice.invoice_number, status = %invoice.status))]
    async fn update_invoice(&self, invoice: &PerDiemInvoice) -> Result<(), PortError> {
        Ok(self.per_diem.update_invoice(&invoice_to_row(invoice)?).await?)
    }

    #[instrument(skip(self, attempt), fields(invoice_id = %attempt.invoice_id, attempt_number = attempt.attempt_number))]
    async fn insert_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError> {
        Ok(self.per_diem.insert_payment_attempt(&attempt_to_row(attempt)?).await?)
    }

    #[instrument(skip(self, attempt), fields(attempt_id = %attempt.id, status = %attempt.status))]
    async fn update_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError> {
        Ok(self.per_diem.update_payment_attempt(&attempt_to_row(attempt)?).await?)
    }

    #[instrument(skip(self, campaign), fields(invoice_id = %campaign.invoice_id, campaign_type = %campaign.campaign_type))]
    async fn insert_dunning_campaign(&self, campaign: &DunningCampaign) -> Result<(), PortError> {
        Ok(self.per_diem.insert_dunning_campaign(&campaign_to_row(campaign)?).await?)
    }

    #[instrument(skip(self))]
    async fn find_retriable_invoices(
        &self,
        now: DateTime<Utc>,
        max_retry_attempts: u32,
    ) -> Result<Vec<PerDiemInvoice>, PortError> {
        let max = to_i32(max_retry_attempts, "max_retry_attempts")?;
        self.per_diem
            .find_retriable_invoices(now, max)
            .await?
            .into_iter()
            .map(invoice_from_row)
            .collect()
    }

    #[instrument(skip(self), fields(payment_method_id = %id))]
    async fn find_payment_method(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PortError> {
        Ok(self
            .per_diem
            .find_payment_method(*id.as_uuid())
            .await?
            .map(payment_method_from_row))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_invoices_for_user_in_month(
        &self,
        user_id: UserId,
        month_start: NaiveDate,
        next_month_start: NaiveDate,
    ) -> Result<Vec<PerDiemInvoice>, PortError> {
        self.per_diem
            .find_invoices_for_user_between(*user_id.as_uuid(), month_start, next_month_start)
            .await?
            .into_iter()
            .map(invoice_from_row)
            .collect()
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<PerDiemInvoice>, PortError> {
        self.per_diem
            .find_invoice(*id.as_uuid())
            .await?
            .map(invoice_from_row)
            .transpose()
    }

    async fn find_invoice_items(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PerDiemInvoiceItem>, PortError> {
        self.per_diem
            .find_invoice_items(*invoice_id.as_uuid())
            .await?
            .into_iter()
            .map(item_from_row)
            .collect()
    }

    async fn find_payment_attempts(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PaymentAttempt>, PortError> {
        self.per_diem
            .find_payment_attempts(*invoice_id.as_uuid())
            .await?
            .into_iter()
            .map(attempt_from_row)
            .collect()
    }

    async fn find_dunning_campaigns(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<DunningCampaign>, PortError> {
        self.per_diem
            .find_dunning_campaigns(*invoice_id.as_uuid())
            .await?
            .into_iter()
            .map(campaign_from_row)
            .collect()
    }
}

// Column conversions

fn to_u32(value: i32, column: &str) -> Result<u32, PortError> {
    u32::try_from(value).map_err(|_| PortError::Transformation {
        message: format!("{} holds negative value {}", column, value),
    })
}

fn to_i32(value: u32, column: &str) -> Result<i32, PortError> {
    i32::try_from(value).map_err(|_| PortError::Transformation {
        message: format!("{} value {} does not fit INTEGER", column, value),
    })
}

fn currency(code: &str) -> Result<Currency, PortError> {
    code.parse::<Currency>().map_err(|e| PortError::Transformation {
        message: e.to_string(),
    })
}

fn contract_from_row(row: ContractRow) -> Result<LeasingContract, PortError> {
    Ok(LeasingContract {
        id: ContractId::from(row.contract_id),
        user_id: UserId::from(row.user_id),
        contract_number: row.contract_number,
        container_size: row.container_size,
        quantity: to_u32(row.quantity, "quantity")?,
        free_days: to_u32(row.free_days, "free_days")?,
        per_diem_rate: row.per_diem_rate,
        start_date: row.start_date,
        end_date: row.end_date,
        status: match row.status {
            DbContractStatus::Active => ContractStatus::Active,
            DbContractStatus::Expired => ContractStatus::Expired,
            DbContractStatus::Terminated => ContractStatus::Terminated,
        },
        origin: row.origin,
        destination: row.destination,
        total_value: row.total_value,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn contract_to_row(contract: &LeasingContract) -> Result<ContractRow, PortError> {
    Ok(ContractRow {
        contract_id: *contract.id.as_uuid(),
        user_id: *contract.user_id.as_uuid(),
        contract_number: contract.contract_number.clone(),
        container_size: contract.container_size.clone(),
        quantity: to_i32(contract.quantity, "quantity")?,
        free_days: to_i32(contract.free_days, "free_days")?,
        per_diem_rate: contract.per_diem_rate,
        start_date: contract.start_date,
        end_date: contract.end_date,
        status: match contract.status {
            ContractStatus::Active => DbContractStatus::Active,
            ContractStatus::Expired => DbContractStatus::Expired,
            ContractStatus::Terminated => DbContractStatus::Terminated,
        },
        origin: contract.origin.clone(),
        destination: contract.destination.clone(),
        total_value: contract.total_value,
        created_at: contract.created_at,
        updated_at: contract.updated_at,
    })
}

fn container_from_row(row: ContainerRow) -> ContractContainer {
    ContractContainer {
        id: row.container_id.into(),
        contract_id: row.contract_id.into(),
        container_number: row.container_number,
        container_type: row.container_type,
        pickup_location: row.pickup_location,
        price: row.price,
        status: match row.status {
            DbContainerStatus::PickedUp => ContainerStatus::PickedUp,
            DbContainerStatus::InTransit => ContainerStatus::InTransit,
            DbContainerStatus::Returned => ContainerStatus::Returned,
        },
        pickup_date: row.pickup_date,
        return_date: row.return_date,
        notes: row.notes,
    }
}

fn container_to_row(container: &ContractContainer) -> ContainerRow {
    ContainerRow {
        container_id: *container.id.as_uuid(),
        contract_id: *container.contract_id.as_uuid(),
        container_number: container.container_number.clone(),
        container_type: container.container_type.clone(),
        pickup_location: container.pickup_location.clone(),
        price: container.price,
        status: match container.status {
            ContainerStatus::PickedUp => DbContainerStatus::PickedUp,
            ContainerStatus::InTransit => DbContainerStatus::InTransit,
            ContainerStatus::Returned => DbContainerStatus::Returned,
        },
        pickup_date: container.pickup_date,
        return_date: container.return_date,
        notes: container.notes.clone(),
    }
}

fn invoice_status_from_db(status: DbInvoiceStatus) -> InvoiceStatus {
    match status {
        DbInvoiceStatus::Pending => InvoiceStatus::Pending,
        DbInvoiceStatus::Paid => InvoiceStatus::Paid,
        DbInvoiceStatus::Failed => InvoiceStatus::Failed,
    }
}

fn invoice_status_to_db(status: InvoiceStatus) -> DbInvoiceStatus {
    match status {
        InvoiceStatus::Pending => DbInvoiceStatus::Pending,
        InvoiceStatus::Paid => DbInvoiceStatus::Paid,
        InvoiceStatus::Failed => DbInvoiceStatus::Failed,
    }
}

fn invoice_from_row(row: InvoiceRow) -> Result<PerDiemInvoice, PortError> {
    let currency = currency(&row.currency)?;
    Ok(PerDiemInvoice {
        id: row.invoice_id.into(),
        user_id: row.user_id.into(),
        contract_id: row.contract_id.into(),
        invoice_number: row.invoice_number,
        billing_date: row.billing_date,
        due_date: row.due_date,
        total_amount: Money::new(row.total_amount, currency),
        per_diem_rate: Money::new(row.per_diem_rate, currency),
        days_overdue: to_u32(row.days_overdue, "days_overdue")?,
        container_count: to_u32(row.container_count, "container_count")?,
        status: invoice_status_from_db(row.status),
        payment_method_id: row.payment_method_id.map(PaymentMethodId::from),
        retry_count: to_u32(row.retry_count, "retry_count")?,
        next_retry_at: row.next_retry_at,
        last_failure_reason: row.last_failure_reason,
        paid_at: row.paid_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn invoice_to_row(invoice: &PerDiemInvoice) -> Result<InvoiceRow, PortError> {
    Ok(InvoiceRow {
        invoice_id: *invoice.id.as_uuid(),
        user_id: *invoice.user_id.as_uuid(),
        contract_id: *invoice.contract_id.as_uuid(),
        invoice_number: invoice.invoice_number.clone(),
        billing_date: invoice.billing_date,
        due_date: invoice.due_date,
        total_amount: invoice.total_amount.amount(),
        per_diem_rate: invoice.per_diem_rate.amount(),
        currency: invoice.total_amount.currency().code().to_string(),
        days_overdue: to_i32(invoice.days_overdue, "days_overdue")?,
        container_count: to_i32(invoice.container_count, "container_count")?,
        status: invoice_status_to_db(invoice.status),
        payment_method_id: invoice.payment_method_id.map(|id| *id.as_uuid()),
        retry_count: to_i32(invoice.retry_count, "retry_count")?,
        next_retry_at: invoice.next_retry_at,
        last_failure_reason: invoice.last_failure_reason.clone(),
        paid_at: invoice.paid_at,
        created_at: invoice.created_at,
        updated_at: invoice.updated_at,
    })
}

fn item_from_row(row: InvoiceItemRow) -> Result<PerDiemInvoiceItem, PortError> {
    let currency = currency(&row.currency)?;
    Ok(PerDiemInvoiceItem {
        id: row.item_id.into(),
        invoice_id: row.invoice_id.into(),
        container_number: row.container_number,
        container_type: row.container_type,
        days_overdue: to_u32(row.days_overdue, "days_overdue")?,
        per_diem_rate: Money::new(row.per_diem_rate, currency),
        line_amount: Money::new(row.line_amount, currency),
    })
}

fn item_to_row(item: &PerDiemInvoiceItem) -> Result<InvoiceItemRow, PortError> {
    Ok(InvoiceItemRow {
        item_id: *item.id.as_uuid(),
        invoice_id: *item.invoice_id.as_uuid(),
        container_number: item.container_number.clone(),
        container_type: item.container_type.clone(),
        days_overdue: to_i32(item.days_overdue, "days_overdue")?,
        per_diem_rate: item.per_diem_rate.amount(),
        line_amount: item.line_amount.amount(),
        currency: item.line_amount.currency().code().to_string(),
    })
}

fn payment_method_from_row(row: PaymentMethodRow) -> PaymentMethod {
    PaymentMethod {
        id: row.payment_method_id.into(),
        user_id: row.user_id.into(),
        method_type: match row.method_type {
            DbPaymentMethodType::Card => PaymentMethodType::Card,
            DbPaymentMethodType::BankAccount => PaymentMethodType::BankAccount,
            DbPaymentMethodType::Paypal => PaymentMethodType::Paypal,
        },
        is_default: row.is_default,
        is_active: row.is_active,
        gateway_token: row.gateway_token,
        created_at: row.created_at,
    }
}

fn payment_method_to_row(method: &PaymentMethod) -> PaymentMethodRow {
    PaymentMethodRow {
        payment_method_id: *method.id.as_uuid(),
        user_id: *method.user_id.as_uuid(),
        method_type: match method.method_type {
            PaymentMethodType::Card => DbPaymentMethodType::Card,
            PaymentMethodType::BankAccount => DbPaymentMethodType::BankAccount,
            PaymentMethodType::Paypal => DbPaymentMethodType::Paypal,
        },
        is_default: method.is_default,
        is_active: method.is_active,
        gateway_token: method.gateway_token.clone(),
        created_at: method.created_at,
    }
}

fn attempt_from_row(row: AttemptRow) -> Result<PaymentAttempt, PortError> {
    Ok(PaymentAttempt {
        id: row.attempt_id.into(),
        invoice_id: row.invoice_id.into(),
        payment_method_id: row.payment_method_id.into(),
        attempt_number: to_u32(row.attempt_number, "attempt_number")?,
        amount: Money::new(row.amount, currency(&row.currency)?),
        status: match row.status {
            DbAttemptStatus::Pending => AttemptStatus::Pending,
            DbAttemptStatus::Success => AttemptStatus::Success,
            DbAttemptStatus::Failed => AttemptStatus::Failed,
        },
        gateway_response: row.gateway_response,
        gateway_transaction_id: row.gateway_transaction_id,
        failure_reason: row.failure_reason,
        attempted_at: row.attempted_at,
        completed_at: row.completed_at,
    })
}

fn attempt_to_row(attempt: &PaymentAttempt) -> Result<AttemptRow, PortError> {
    Ok(AttemptRow {
        attempt_id: *attempt.id.as_uuid(),
        invoice_id: *attempt.invoice_id.as_uuid(),
        payment_method_id: *attempt.payment_method_id.as_uuid(),
        attempt_number: to_i32(attempt.attempt_number, "attempt_number")?,
        amount: attempt.amount.amount(),
        currency: attempt.amount.currency().code().to_string(),
        status: match attempt.status {
            AttemptStatus::Pending => DbAttemptStatus::Pending,
            AttemptStatus::Success => DbAttemptStatus::Success,
            AttemptStatus::Failed => DbAttemptStatus::Failed,
        },
        gateway_response: attempt.gateway_response.clone(),
        gateway_transaction_id: attempt.gateway_transaction_id.clone(),
        failure_reason: attempt.failure_reason.clone(),
        attempted_at: attempt.attempted_at,
        completed_at: attempt.completed_at,
    })
}

fn campaign_from_row(row: CampaignRow) -> Result<DunningCampaign, PortError> {
    Ok(DunningCampaign {
        id: row.campaign_id.into(),
        user_id: row.user_id.into(),
        invoice_id: row.invoice_id.into(),
        campaign_type: match row.campaign_type {
            DbCampaignType::Reminder => CampaignType::Reminder,
            DbCampaignType::Warning => CampaignType::Warning,
            DbCampaignType::FinalNotice => CampaignType::FinalNotice,
            DbCampaignType::Collection => CampaignType::Collection,
        },
        status: match row.status {
            DbCampaignStatus::Active => CampaignStatus::Active,
            DbCampaignStatus::Paused => CampaignStatus::Paused,
            DbCampaignStatus::Completed => CampaignStatus::Completed,
            DbCampaignStatus::Cancelled => CampaignStatus::Cancelled,
        },
        start_date: row.start_date,
        end_date: row.end_date,
        next_action_date: row.next_action_date,
        emails_sent: to_u32(row.emails_sent, "emails_sent")?,
        calls_made: to_u32(row.calls_made, "calls_made")?,
        notices_sent: to_u32(row.notices_sent, "notices_sent")?,
    })
}

fn campaign_to_row(campaign: &DunningCampaign) -> Result<CampaignRow, PortError> {
    Ok(CampaignRow {
        campaign_id: *campaign.id.as_uuid(),
        user_id: *campaign.user_id.as_uuid(),
        invoice_id: *campaign.invoice_id.as_uuid(),
        campaign_type: match campaign.campaign_type {
            CampaignType::Reminder => DbCampaignType::Reminder,
            CampaignType::Warning => DbCampaignType::Warning,
            CampaignType::FinalNotice => DbCampaignType::FinalNotice,
            CampaignType::Collection => DbCampaignType::Collection,
        },
        status: match campaign.status {
            CampaignStatus::Active => DbCampaignStatus::Active,
            CampaignStatus::Paused => DbCampaignStatus::Paused,
            CampaignStatus::Completed => DbCampaignStatus::Completed,
            CampaignStatus::Cancelled => DbCampaignStatus::Cancelled,
        },
        start_date: campaign.start_date,
        end_date: campaign.end_date,
        next_action_date: campaign.next_action_date,
        emails_sent: to_i32(campaign.emails_sent, "emails_sent")?,
        calls_made: to_i32(campaign.calls_made, "calls_made")?,
        notices_sent: to_i32(campaign.notices_sent, "notices_sent")?,
    })
}
