//! In-memory adapters for the billing ports
//!
//! `InMemoryLedgerStore` enforces the same uniqueness rules as the database
//! schema. `ScriptedGateway` answers charges from a queue of canned outcomes.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};

use core_kernel::{
    AdapterHealth, ContractId, DomainPort, HealthCheckResult, HealthCheckable, InvoiceId,
    PaymentMethodId, PortError, UserId,
};
use domain_leasing::{ContractContainer, ContractStatus, LeasingContract};

use crate::dunning::DunningCampaign;
use crate::invoice::{InvoiceStatus, PerDiemInvoice, PerDiemInvoiceItem};
use crate::payment::{PaymentAttempt, PaymentMethod};
use crate::ports::{ChargeOutcome, ChargeRequest, LedgerStore, PaymentGateway};

#[derive(Debug, Default)]
struct LedgerState {
    contracts: Vec<LeasingContract>,
    containers: Vec<ContractContainer>,
    payment_methods: Vec<PaymentMethod>,
    invoices: Vec<PerDiemInvoice>,
    items: Vec<PerDiemInvoiceItem>,
    attempts: Vec<PaymentAttempt>,
    campaigns: Vec<DunningCampaign>,
    unavailable: bool,
    failing_contracts: HashSet<ContractId>,
}

impl LedgerState {
    fn check_available(&self) -> Result<(), PortError> {
        if self.unavailable {
            return Err(PortError::connection("in-memory ledger marked unavailable"));
        }
        Ok(())
    }
}

/// In-memory ledger store for tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contract(&self, contract: LeasingContract) {
        self.state.write().await.contracts.push(contract);
    }

    pub async fn add_container(&self, container: ContractContainer) {
        self.state.write().await.containers.push(container);
    }

    pub async fn add_payment_method(&self, method: PaymentMethod) {
        self.state.write().await.payment_methods.push(method);
    }

    /// Marks a container returned, as depot check-in would
    pub async fn return_container(&self, container_number: &str, at: DateTime<Utc>) -> bool {
        let mut state = self.state.write().await;
        match state
            .containers
            .iter_mut()
            .find(|c| c.container_number == container_number)
        {
            Some(container) => container.mark_returned(at).is_ok(),
            None => false,
        }
    }

    /// Deactivates a stored payment method
    pub async fn deactivate_payment_method(&self, id: PaymentMethodId) {
        let mut state = self.state.write().await;
        if let Some(method) = state.payment_methods.iter_mut().find(|m| m.id == id) {
            method.is_active = false;
        }
    }

    /// Makes every call fail with a connection error
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes container lookups for one contract fail
    pub async fn fail_container_lookups_for(&self, contract_id: ContractId) {
        self.state.write().await.failing_contracts.insert(contract_id);
    }

    pub async fn invoices(&self) -> Vec<PerDiemInvoice> {
        self.state.read().await.invoices.clone()
    }

    pub async fn invoice_items(&self) -> Vec<PerDiemInvoiceItem> {
        self.state.read().await.items.clone()
    }

    pub async fn payment_attempts(&self) -> Vec<PaymentAttempt> {
        self.state.read().await.attempts.clone()
    }

    pub async fn dunning_campaigns(&self) -> Vec<DunningCampaign> {
        self.state.read().await.campaigns.clone()
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let unavailable = self.state.read().await.unavailable;
        HealthCheckResult {
            adapter_id: "in-memory-ledger".to_string(),
            status: if unavailable {
                AdapterHealth::Unhealthy
            } else {
                AdapterHealth::Healthy
            },
            latency_ms: 0,
            message: None,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_overdue_contracts_with_unreturned_containers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(LeasingContract, ContractContainer)>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;

        let mut rows = Vec::new();
        for contract in state
            .contracts
            .iter()
            .filter(|c| c.status == ContractStatus::Active && c.end_date < now)
        {
            for container in state
                .containers
                .iter()
                .filter(|c| c.contract_id == contract.id && c.is_outstanding())
            {
                rows.push((contract.clone(), container.clone()));
            }
        }
        Ok(rows)
    }

    async fn find_unreturned_containers(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ContractContainer>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        if state.failing_contracts.contains(&contract_id) {
            return Err(PortError::connection(format!(
                "container lookup failed for {}",
                contract_id
            )));
        }

        Ok(state
            .containers
            .iter()
            .filter(|c| c.contract_id == contract_id && c.is_outstanding())
            .cloned()
            .collect())
    }

    async fn find_invoice_for_contract_on_date(
        &self,
        contract_id: ContractId,
        billing_date: NaiveDate,
    ) -> Result<Option<PerDiemInvoice>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.contract_id == contract_id && i.billing_date == billing_date)
            .cloned())
    }

    async fn find_default_active_payment_method(
        &self,
        user_id: UserId,
    ) -> Result<Option<PaymentMethod>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .payment_methods
            .iter()
            .filter(|m| m.user_id == user_id && m.is_default && m.is_active)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn insert_invoice(
        &self,
        invoice: &PerDiemInvoice,
        items: &[PerDiemInvoiceItem],
    ) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if state.invoices.iter().any(|i| {
            (i.contract_id == invoice.contract_id && i.billing_date == invoice.billing_date)
                || i.invoice_number == invoice.invoice_number
        }) {
            return Err(PortError::conflict(format!(
                "invoice {} already exists",
                invoice.invoice_number
            )));
        }

        state.invoices.push(invoice.clone());
        state.items.extend_from_slice(items);
        Ok(())
    }

    async fn update_invoice(&self, invoice: &PerDiemInvoice) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let stored = state
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice.id)
            .ok_or_else(|| PortError::not_found("PerDiemInvoice", invoice.id))?;
        *stored = invoice.clone();
        Ok(())
    }

    async fn insert_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if state.attempts.iter().any(|a| {
            a.invoice_id == attempt.invoice_id && a.attempt_number == attempt.attempt_number
        }) {
            return Err(PortError::conflict(format!(
                "attempt {} already recorded for invoice {}",
                attempt.attempt_number, attempt.invoice_id
            )));
        }
        state.attempts.push(attempt.clone());
        Ok(())
    }

    async fn update_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let stored = state
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt.id)
            .ok_or_else(|| PortError::not_found("PaymentAttempt", attempt.id))?;
        *stored = attempt.clone();
        Ok(())
    }

    async fn insert_dunning_campaign(&self, campaign: &DunningCampaign) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.campaigns.push(campaign.clone());
        Ok(())
    }

    async fn find_retriable_invoices(
        &self,
        now: DateTime<Utc>,
        max_retry_attempts: u32,
    ) -> Result<Vec<PerDiemInvoice>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .invoices
            .iter()
            .filter(|i| {
                i.status == InvoiceStatus::Pending
                    && i.retry_count < max_retry_attempts
                    && i.next_retry_at.is_some_and(|due| due < now)
            })
            .cloned()
            .collect())
    }

    async fn find_payment_method(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.payment_methods.iter().find(|m| m.id == id).cloned())
    }

    async fn find_invoices_for_user_in_month(
        &self,
        user_id: UserId,
        month_start: NaiveDate,
        next_month_start: NaiveDate,
    ) -> Result<Vec<PerDiemInvoice>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .invoices
            .iter()
            .filter(|i| {
                i.user_id == user_id
                    && i.billing_date >= month_start
                    && i.billing_date < next_month_start
            })
            .cloned()
            .collect())
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<PerDiemInvoice>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.invoices.iter().find(|i| i.id == id).cloned())
    }

    async fn find_invoice_items(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PerDiemInvoiceItem>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn find_payment_attempts(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PaymentAttempt>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut attempts: Vec<PaymentAttempt> = state
            .attempts
            .iter()
            .filter(|a| a.invoice_id == invoice_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn find_dunning_campaigns(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<DunningCampaign>, PortError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .campaigns
            .iter()
            .filter(|c| c.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}

/// Payment gateway that replays queued outcomes
///
/// Once the queue is empty every charge gets the fallback outcome.
#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    script: Arc<Mutex<VecDeque<Result<ChargeOutcome, PortError>>>>,
    fallback: ChargeOutcome,
    requests: Arc<Mutex<Vec<ChargeRequest>>>,
}

impl ScriptedGateway {
    /// Approves every charge
    pub fn approving() -> Self {
        Self::with_fallback(ChargeOutcome::approved("txn-scripted"))
    }

    /// Declines every charge with `reason`
    pub fn declining(reason: &str) -> Self {
        Self::with_fallback(ChargeOutcome::declined(reason))
    }

    pub fn with_fallback(fallback: ChargeOutcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues the answer for the next unanswered charge
    pub async fn push(&self, outcome: Result<ChargeOutcome, PortError>) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl DomainPort for ScriptedGateway {}

#[async_trait]
impl HealthCheckable for ScriptedGateway {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            adapter_id: "scripted-gateway".to_string(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: Some("Scripted gateway always healthy".to_string()),
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PortError> {
        self.requests.lock().await.push(request.clone());
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.fallback.clone()),
        }
    }
}
