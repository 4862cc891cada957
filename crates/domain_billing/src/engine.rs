//! Per-diem billing engine
//!
//! One call to [`PerDiemBillingEngine::process_automated_billing`] is one
//! billing cycle:
//!
//! 1. discover contracts with overdue, unreturned containers
//! 2. raise at most one invoice per contract for the local billing day
//! 3. charge the lessee's default payment method, or open a reminder
//! 4. sweep pending invoices whose retry is due and charge them again
//!
//! Only discovery failures abort a cycle. Anything that goes wrong for a
//! single contract or invoice is logged, counted and left for the next run.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use core_kernel::temporal::next_month_start;
use core_kernel::{Clock, UserId};
use domain_leasing::{group_by_contract, ContractContainer, LeasingContract, OverdueContract};

use crate::dunning::{CampaignType, DunningCampaign};
use crate::error::BillingError;
use crate::invoice::{FailureOutcome, PerDiemInvoice};
use crate::payment::{PaymentAttempt, PaymentMethod};
use crate::policy::BillingPolicy;
use crate::ports::{ChargeRequest, LedgerStore, PaymentGateway};
use crate::report::{BillingRunReport, CollectionOutcome, ContractBillingOutcome, RetrySweep};
use crate::stats::BillingStats;

/// Orchestrates daily per-diem invoicing and collection
pub struct PerDiemBillingEngine {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl PerDiemBillingEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Result<Self, BillingError> {
        policy.validate()?;
        Ok(Self {
            store,
            gateway,
            clock,
            policy,
        })
    }

    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    /// Runs one billing cycle
    ///
    /// Safe to call repeatedly on the same day: a contract already invoiced
    /// for the local billing date is skipped.
    #[instrument(skip(self))]
    pub async fn process_automated_billing(&self) -> Result<BillingRunReport, BillingError> {
        let mut report = BillingRunReport::started(self.clock.now());

        let overdue = self.get_contracts_needing_billing().await?;
        report.contracts_discovered = overdue.len();
        info!(contracts = overdue.len(), "Starting per-diem billing cycle");

        for entry in &overdue {
            match self.process_contract_billing(entry).await {
                Ok(outcome) => report.record_contract(&outcome),
                Err(e) => {
                    report.contract_errors += 1;
                    error!(
                        contract_id = %entry.contract.id,
                        contract_number = %entry.contract.contract_number,
                        error = %e,
                        "Per-diem billing failed for contract"
                    );
                }
            }
        }

        let sweep = self.process_payment_retries().await?;
        report.record_retry_sweep(&sweep);
        report.finished_at = self.clock.now();

        info!(
            invoices_created = report.invoices_created,
            already_billed = report.already_billed,
            payments_succeeded = report.payments_succeeded,
            payments_failed = report.payments_failed,
            dunning_opened = report.dunning_campaigns_opened,
            contract_errors = report.contract_errors,
            retry_errors = report.retry_errors,
            "Per-diem billing cycle finished"
        );
        Ok(report)
    }

    /// Active contracts past their free period with outstanding containers
    pub async fn get_contracts_needing_billing(&self) -> Result<Vec<OverdueContract>, BillingError> {
        let now = self.clock.now();
        let rows = self
            .store
            .find_overdue_contracts_with_unreturned_containers(now)
            .await?;

        let rows = rows
            .into_iter()
            .filter(|(contract, container)| {
                contract.is_past_free_period(now) && container.is_outstanding()
            })
            .collect();

        Ok(group_by_contract(rows))
    }

    /// Bills one overdue contract for today
    ///
    /// The container set is re-read from the store; containers returned since
    /// discovery are never billed.
    #[instrument(skip(self, overdue), fields(contract_number = %overdue.contract.contract_number))]
    pub async fn process_contract_billing(
        &self,
        overdue: &OverdueContract,
    ) -> Result<ContractBillingOutcome, BillingError> {
        let contract = &overdue.contract;
        let now = self.clock.now();

        let containers: Vec<ContractContainer> = self
            .store
            .find_unreturned_containers(contract.id)
            .await?
            .into_iter()
            .filter(ContractContainer::is_outstanding)
            .collect();

        if containers.is_empty() {
            debug!("No outstanding containers left");
            return Ok(ContractBillingOutcome::NothingOutstanding);
        }

        let days_overdue = contract.days_overdue_at(now);
        if days_overdue <= 0 {
            debug!(days_overdue, "Contract is still inside its free period");
            return Ok(ContractBillingOutcome::NotYetOverdue);
        }

        let billing_date = self.policy.timezone.date_of(now);
        if self
            .store
            .find_invoice_for_contract_on_date(contract.id, billing_date)
            .await?
            .is_some()
        {
            debug!(%billing_date, "Contract already invoiced today");
            return Ok(ContractBillingOutcome::AlreadyBilled);
        }

        self.create_per_diem_invoice(contract, &containers, days_overdue)
            .await
    }

    /// Raises today's invoice and starts collection
    ///
    /// `days_overdue` is informational; every invoice bills exactly one day.
    #[instrument(skip(self, contract, containers), fields(contract_number = %contract.contract_number, containers = containers.len()))]
    pub async fn create_per_diem_invoice(
        &self,
        contract: &LeasingContract,
        containers: &[ContractContainer],
        days_overdue: i64,
    ) -> Result<ContractBillingOutcome, BillingError> {
        let now = self.clock.now();
        let billing_date = self.policy.timezone.date_of(now);
        let rate = self.policy.per_diem_rate_for(contract);

        let payment_method = self
            .store
            .find_default_active_payment_method(contract.user_id)
            .await?;

        let (mut invoice, items) = PerDiemInvoice::for_outstanding_containers(
            contract,
            containers,
            rate,
            billing_date,
            payment_method.as_ref().map(|m| m.id),
            now,
        )?;

        match self.store.insert_invoice(&invoice, &items).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(invoice_number = %invoice.invoice_number, "Invoice raced with another run");
                return Ok(ContractBillingOutcome::AlreadyBilled);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            invoice_number = %invoice.invoice_number,
            total = %invoice.total_amount,
            container_count = invoice.container_count,
            days_overdue,
            "Per-diem invoice created"
        );

        let collection = match payment_method {
            Some(method) => self.attempt_automatic_payment(&mut invoice, &method).await?,
            None => {
                warn!(
                    invoice_number = %invoice.invoice_number,
                    user_id = %contract.user_id,
                    "No default payment method; opening reminder"
                );
                let opened = self
                    .initiate_dunning_campaign(&invoice, CampaignType::Reminder)
                    .await?;
                CollectionOutcome::AwaitingPaymentMethod {
                    dunning_opened: opened.is_some(),
                }
            }
        };

        Ok(ContractBillingOutcome::Invoiced {
            invoice_number: invoice.invoice_number,
            collection,
        })
    }

    /// Charges `invoice` once against `method`
    ///
    /// The attempt is stored before the gateway is called. A gateway error is
    /// handled exactly like a decline.
    #[instrument(skip(self, invoice, method), fields(invoice_number = %invoice.invoice_number, attempt_number = invoice.next_attempt_number()))]
    pub async fn attempt_automatic_payment(
        &self,
        invoice: &mut PerDiemInvoice,
        method: &PaymentMethod,
    ) -> Result<CollectionOutcome, BillingError> {
        invoice.ensure_collectable()?;
        invoice.payment_method_id = Some(method.id);

        let mut attempt = PaymentAttempt::begin(invoice, method.id, self.clock.now());
        self.store.insert_payment_attempt(&attempt).await?;

        let request = ChargeRequest {
            payment_method_ref: method.gateway_reference(),
            amount: invoice.total_amount,
            idempotency_key: attempt.idempotency_key(&invoice.invoice_number),
        };

        match self.gateway.charge(&request).await {
            Ok(outcome) if outcome.success => {
                let now = self.clock.now();
                attempt.succeed(outcome.transaction_ref, outcome.raw_response, now)?;
                invoice.mark_paid(now)?;
                self.store.update_payment_attempt(&attempt).await?;
                self.store.update_invoice(invoice).await?;
                info!(amount = %invoice.total_amount, "Per-diem invoice paid");
                Ok(CollectionOutcome::Paid)
            }
            Ok(outcome) => {
                attempt.gateway_response = outcome.raw_response;
                let reason = outcome
                    .failure_reason
                    .unwrap_or_else(|| "Payment declined".to_string());
                self.handle_payment_failure(invoice, &mut attempt, &reason)
                    .await
            }
            Err(e) => {
                self.handle_payment_failure(invoice, &mut attempt, &e.to_string())
                    .await
            }
        }
    }

    /// Fails the attempt and moves the invoice to retry or to failed
    pub async fn handle_payment_failure(
        &self,
        invoice: &mut PerDiemInvoice,
        attempt: &mut PaymentAttempt,
        reason: &str,
    ) -> Result<CollectionOutcome, BillingError> {
        let now = self.clock.now();

        attempt.fail(reason, now)?;
        self.store.update_payment_attempt(attempt).await?;

        let outcome = invoice.record_failure(reason, &self.policy, now)?;
        self.store.update_invoice(invoice).await?;

        match outcome {
            FailureOutcome::RetryScheduled { next_retry_at } => {
                warn!(
                    invoice_number = %invoice.invoice_number,
                    retry_count = invoice.retry_count,
                    %next_retry_at,
                    reason,
                    "Per-diem payment failed; retry scheduled"
                );
                Ok(CollectionOutcome::RetryScheduled { next_retry_at })
            }
            FailureOutcome::Exhausted => {
                warn!(
                    invoice_number = %invoice.invoice_number,
                    retry_count = invoice.retry_count,
                    reason,
                    "Per-diem payment retries exhausted"
                );
                let opened = self
                    .initiate_dunning_campaign(invoice, CampaignType::Warning)
                    .await?;
                Ok(CollectionOutcome::Failed {
                    dunning_opened: opened.is_some(),
                })
            }
        }
    }

    /// Charges every pending invoice whose retry is due
    ///
    /// Invoices without a resolvable, active payment method are skipped
    /// without any change.
    #[instrument(skip(self))]
    pub async fn process_payment_retries(&self) -> Result<RetrySweep, BillingError> {
        let now = self.clock.now();
        let due = self
            .store
            .find_retriable_invoices(now, self.policy.max_retry_attempts)
            .await?;

        let mut sweep = RetrySweep {
            due: due.len(),
            ..RetrySweep::default()
        };

        for mut invoice in due {
            if !invoice.is_due_for_retry(now, &self.policy) {
                continue;
            }

            let method = match invoice.payment_method_id {
                Some(id) => self.store.find_payment_method(id).await,
                None => Ok(None),
            };

            match method {
                Ok(Some(method)) if method.is_chargeable() => {
                    match self.attempt_automatic_payment(&mut invoice, &method).await {
                        Ok(outcome) => sweep.outcomes.push(outcome),
                        Err(e) => {
                            sweep.errors += 1;
                            error!(
                                invoice_number = %invoice.invoice_number,
                                error = %e,
                                "Per-diem payment retry failed"
                            );
                        }
                    }
                }
                Ok(_) => {
                    sweep.skipped_without_payment_method += 1;
                    warn!(
                        invoice_number = %invoice.invoice_number,
                        "Retry skipped; payment method missing or inactive"
                    );
                }
                Err(e) => {
                    sweep.errors += 1;
                    error!(
                        invoice_number = %invoice.invoice_number,
                        error = %e,
                        "Could not load payment method for retry"
                    );
                }
            }
        }

        Ok(sweep)
    }

    /// Opens a dunning campaign of `campaign_type` for `invoice`
    ///
    /// Returns `None` when the invoice already has a campaign at this stage
    /// or a later one, keeping escalation monotonic.
    pub async fn initiate_dunning_campaign(
        &self,
        invoice: &PerDiemInvoice,
        campaign_type: CampaignType,
    ) -> Result<Option<DunningCampaign>, BillingError> {
        let existing = self.store.find_dunning_campaigns(invoice.id).await?;
        if existing.iter().any(|c| !c.is_superseded_by(campaign_type)) {
            debug!(
                invoice_number = %invoice.invoice_number,
                %campaign_type,
                "Dunning already at or past this stage"
            );
            return Ok(None);
        }

        let campaign = DunningCampaign::open(
            invoice,
            campaign_type,
            self.policy.dunning_follow_up,
            self.clock.now(),
        );
        self.store.insert_dunning_campaign(&campaign).await?;

        info!(
            invoice_number = %invoice.invoice_number,
            %campaign_type,
            next_action_date = %campaign.next_action_date,
            "Dunning campaign opened"
        );
        Ok(Some(campaign))
    }

    /// Current-month invoice counts and total for a lessee
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn get_billing_stats(&self, user_id: UserId) -> Result<BillingStats, BillingError> {
        let month_start = self.policy.timezone.month_start_of(self.clock.now());
        let month_end = next_month_start(month_start)?;

        let invoices = self
            .store
            .find_invoices_for_user_in_month(user_id, month_start, month_end)
            .await?;

        Ok(BillingStats::from_invoices(&invoices, self.policy.currency)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dunning::CampaignType;
    use crate::invoice::InvoiceStatus;
    use crate::mock::{InMemoryLedgerStore, ScriptedGateway};
    use crate::payment::{AttemptStatus, PaymentMethodType};
    use crate::ports::ChargeOutcome;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use core_kernel::{Currency, ManualClock, Money, PaymentMethodId, PortError};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        store: InMemoryLedgerStore,
        gateway: ScriptedGateway,
        clock: Arc<ManualClock>,
        engine: PerDiemBillingEngine,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 10, 6, 0, 0).unwrap()
    }

    fn harness(gateway: ScriptedGateway) -> Harness {
        harness_with_policy(gateway, BillingPolicy::default())
    }

    fn harness_with_policy(gateway: ScriptedGateway, policy: BillingPolicy) -> Harness {
        let store = InMemoryLedgerStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let engine = PerDiemBillingEngine::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            clock.clone(),
            policy,
        )
        .unwrap();
        Harness {
            store,
            gateway,
            clock,
            engine,
        }
    }

    /// Contract whose free period ends at `end_date`, with `containers` picked up
    async fn seed_contract(
        store: &InMemoryLedgerStore,
        user_id: UserId,
        number: &str,
        end_date: DateTime<Utc>,
        containers: usize,
        rate: Option<Decimal>,
    ) -> LeasingContract {
        let contract = LeasingContract::new(
            user_id,
            number,
            "40HC",
            containers.max(1) as u32,
            10,
            rate,
            end_date - Duration::days(10),
            "Qingdao",
            "Hamburg",
            dec!(8000),
        )
        .unwrap();

        for n in 0..containers {
            store
                .add_container(ContractContainer::picked_up(
                    contract.id,
                    format!("{}-BOX{}", number, n + 1),
                    "40HC",
                    "Qingdao Depot",
                    dec!(2000),
                    contract.start_date,
                ))
                .await;
        }
        store.add_contract(contract.clone()).await;
        contract
    }

    async fn seed_default_method(store: &InMemoryLedgerStore, user_id: UserId) -> PaymentMethodId {
        let method = PaymentMethod {
            id: PaymentMethodId::new(),
            user_id,
            method_type: PaymentMethodType::Card,
            is_default: true,
            is_active: true,
            gateway_token: Some(format!("tok_{}", user_id.as_uuid().simple())),
            created_at: start() - Duration::days(30),
        };
        let id = method.id;
        store.add_payment_method(method).await;
        id
    }

    #[tokio::test]
    async fn test_overdue_contract_is_invoiced_and_paid() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-1", start() - Duration::days(1), 2, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.invoice_number, "PD-LC-1-20240710");
        assert_eq!(invoice.total_amount, Money::new(dec!(10), Currency::USD));
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.paid_at, Some(start()));

        let items = h.store.invoice_items().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.line_amount.amount() == dec!(5)));

        let attempts = h.store.payment_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Success);
        assert_eq!(attempts[0].attempt_number, 1);
        assert_eq!(attempts[0].gateway_transaction_id.as_deref(), Some("txn-scripted"));

        assert_eq!(report.invoices_created, 1);
        assert_eq!(report.payments_succeeded, 1);
        assert!(h.store.dunning_campaigns().await.is_empty());
    }

    #[tokio::test]
    async fn test_same_day_runs_create_one_invoice() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-1", start() - Duration::days(1), 2, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();
        h.clock.advance(Duration::hours(6));
        let second = h.engine.process_automated_billing().await.unwrap();

        assert_eq!(h.store.invoices().await.len(), 1);
        assert_eq!(h.gateway.call_count().await, 1);
        assert_eq!(second.already_billed, 1);
        assert_eq!(second.invoices_created, 0);
    }

    #[tokio::test]
    async fn test_next_day_bills_again() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-1", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();
        h.clock.advance(Duration::days(1));
        h.engine.process_automated_billing().await.unwrap();

        let numbers: Vec<String> = h.store.invoices().await.into_iter().map(|i| i.invoice_number).collect();
        assert_eq!(numbers, vec!["PD-LC-1-20240710", "PD-LC-1-20240711"]);
    }

    #[tokio::test]
    async fn test_three_failures_fail_invoice_and_open_one_warning() {
        let h = harness(ScriptedGateway::declining("Card declined"));
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-1", start() - Duration::days(1), 2, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();
        let first = h.store.invoices().await[0].clone();
        assert_eq!(first.status, InvoiceStatus::Pending);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.next_retry_at, Some(start() + Duration::hours(24)));

        for _ in 0..3 {
            h.clock.advance(Duration::hours(24) + Duration::minutes(1));
            h.engine.process_automated_billing().await.unwrap();
        }

        let first = h.store.find_invoice(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, InvoiceStatus::Failed);
        assert_eq!(first.retry_count, 3);
        assert_eq!(first.last_failure_reason.as_deref(), Some("Card declined"));

        let attempts = h.store.find_payment_attempts(first.id).await.unwrap();
        let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(attempts.iter().all(|a| a.status == AttemptStatus::Failed));

        let campaigns = h.store.find_dunning_campaigns(first.id).await.unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].campaign_type, CampaignType::Warning);
    }

    #[tokio::test]
    async fn test_gateway_error_is_handled_as_decline() {
        let gateway = ScriptedGateway::approving();
        gateway.push(Err(PortError::connection("gateway unreachable"))).await;
        let h = harness(gateway);
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-1", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        let invoice = &invoices[0];
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.retry_count, 1);
        assert!(invoice.last_failure_reason.as_deref().unwrap().contains("gateway unreachable"));
        assert_eq!(report.retries_scheduled, 1);
        assert_eq!(report.contract_errors, 0);

        h.clock.advance(Duration::hours(25));
        h.engine.process_payment_retries().await.unwrap();
        let invoice = h.store.find_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_contract_inside_free_period_is_not_billed() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-2", start() + Duration::days(1), 3, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        assert!(h.store.invoices().await.is_empty());
        assert_eq!(report.contracts_discovered, 0);
    }

    #[tokio::test]
    async fn test_returned_containers_are_not_billed() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-3", start() - Duration::days(4), 2, Some(dec!(5))).await;
        h.store.return_container("LC-3-BOX1", start() - Duration::days(1)).await;
        h.store.return_container("LC-3-BOX2", start() - Duration::days(1)).await;

        h.engine.process_automated_billing().await.unwrap();

        assert!(h.store.invoices().await.is_empty());
    }

    #[tokio::test]
    async fn test_container_returned_after_discovery_is_excluded() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-4", start() - Duration::days(2), 2, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        let overdue = h.engine.get_contracts_needing_billing().await.unwrap();
        assert_eq!(overdue[0].container_count(), 2);
        h.store.return_container("LC-4-BOX1", start()).await;

        h.engine.process_contract_billing(&overdue[0]).await.unwrap();

        let items = h.store.invoice_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].container_number, "LC-4-BOX2");
        assert_eq!(h.store.invoices().await[0].total_amount.amount(), dec!(5));
    }

    #[tokio::test]
    async fn test_missing_payment_method_opens_reminder() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-5", start() - Duration::days(1), 1, Some(dec!(5))).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        let invoice = &invoices[0];
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert!(invoice.payment_method_id.is_none());
        assert!(h.store.payment_attempts().await.is_empty());
        assert_eq!(h.gateway.call_count().await, 0);

        let campaigns = h.store.dunning_campaigns().await;
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].campaign_type, CampaignType::Reminder);
        assert_eq!(campaigns[0].next_action_date, start() + Duration::hours(24));
        assert_eq!(report.dunning_campaigns_opened, 1);
    }

    #[tokio::test]
    async fn test_unset_rate_falls_back_to_default() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-6", start() - Duration::days(1), 2, None).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();

        assert_eq!(h.store.invoices().await[0].total_amount.amount(), dec!(50));
        let requests = h.gateway.requests().await;
        assert_eq!(requests[0].amount.amount(), dec!(50));
        assert_eq!(requests[0].idempotency_key, "PD-LC-6-20240710-1");
    }

    #[tokio::test]
    async fn test_one_failing_contract_does_not_stop_the_run() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        let broken = seed_contract(&h.store, user, "LC-7", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_contract(&h.store, user, "LC-8", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;
        h.store.fail_container_lookups_for(broken.id).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        assert_eq!(report.contract_errors, 1);
        assert_eq!(report.invoices_created, 1);
        assert_eq!(h.store.invoices().await[0].invoice_number, "PD-LC-8-20240710");
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_the_run() {
        let h = harness(ScriptedGateway::approving());
        h.store.set_unavailable(true).await;

        let result = h.engine.process_automated_billing().await;

        assert!(matches!(result, Err(BillingError::Port(PortError::Connection { .. }))));
    }

    #[tokio::test]
    async fn test_concurrent_insert_is_treated_as_already_billed() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        let contract = seed_contract(&h.store, user, "LC-9", start() - Duration::days(1), 1, Some(dec!(5))).await;
        let containers = h.store.find_unreturned_containers(contract.id).await.unwrap();

        let first = h.engine.create_per_diem_invoice(&contract, &containers, 1).await.unwrap();
        let second = h.engine.create_per_diem_invoice(&contract, &containers, 1).await.unwrap();

        assert!(matches!(first, ContractBillingOutcome::Invoiced { .. }));
        assert_eq!(second, ContractBillingOutcome::AlreadyBilled);
        assert_eq!(h.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_skips_inactive_payment_method() {
        let h = harness(ScriptedGateway::declining("Insufficient funds"));
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-10", start() - Duration::days(1), 1, Some(dec!(5))).await;
        let method_id = seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();
        h.store.deactivate_payment_method(method_id).await;
        h.clock.advance(Duration::hours(25));

        let sweep = h.engine.process_payment_retries().await.unwrap();

        assert_eq!(sweep.skipped_without_payment_method, 1);
        assert!(sweep.outcomes.is_empty());
        let invoices = h.store.invoices().await;
        let invoice = &invoices[0];
        assert_eq!(invoice.retry_count, 1);
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(h.store.payment_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_paid_invoice_cannot_be_charged_again() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-11", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;
        h.engine.process_automated_billing().await.unwrap();

        let mut invoice = h.store.invoices().await[0].clone();
        let method = h.store.find_default_active_payment_method(user).await.unwrap().unwrap();
        let result = h.engine.attempt_automatic_payment(&mut invoice, &method).await;

        assert!(matches!(result, Err(BillingError::InvalidStatusTransition { .. })));
        assert_eq!(h.gateway.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_dunning_does_not_step_backwards() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-12", start() - Duration::days(1), 1, Some(dec!(5))).await;
        h.engine.process_automated_billing().await.unwrap();
        let invoice = h.store.invoices().await[0].clone();

        let warning = h.engine.initiate_dunning_campaign(&invoice, CampaignType::Warning).await.unwrap();
        let reminder = h.engine.initiate_dunning_campaign(&invoice, CampaignType::Reminder).await.unwrap();

        assert!(warning.is_some());
        assert!(reminder.is_none());
        assert_eq!(h.store.dunning_campaigns().await.len(), 2);
    }

    #[tokio::test]
    async fn test_billing_day_follows_policy_timezone() {
        let policy = BillingPolicy {
            timezone: "Asia/Shanghai".parse().unwrap(),
            ..BillingPolicy::default()
        };
        let h = harness_with_policy(ScriptedGateway::approving(), policy);
        h.clock.set(Utc.with_ymd_and_hms(2024, 7, 10, 20, 0, 0).unwrap());
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-13", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        let invoice = &invoices[0];
        assert_eq!(invoice.billing_date, NaiveDate::from_ymd_opt(2024, 7, 11).unwrap());
        assert_eq!(invoice.invoice_number, "PD-LC-13-20240711");
    }

    #[tokio::test]
    async fn test_billing_stats_for_current_month() {
        let h = harness(ScriptedGateway::approving());
        let user = UserId::new();
        let contract = seed_contract(&h.store, user, "LC-14", start() - Duration::days(20), 1, Some(dec!(5))).await;
        let containers = h.store.find_unreturned_containers(contract.id).await.unwrap();

        let raise = |day: u32, amount: Decimal| {
            PerDiemInvoice::for_outstanding_containers(
                &contract,
                &containers,
                Money::new(amount, Currency::USD),
                NaiveDate::from_ymd_opt(2024, 7, day).unwrap(),
                None,
                start(),
            )
            .unwrap()
        };

        for (day, amount, paid) in [(2, dec!(5), true), (3, dec!(10), true), (4, dec!(10), false)] {
            let (mut invoice, items) = raise(day, amount);
            if paid {
                invoice.mark_paid(start()).unwrap();
            }
            h.store.insert_invoice(&invoice, &items).await.unwrap();
        }
        let (june, june_items) = PerDiemInvoice::for_outstanding_containers(
            &contract,
            &containers,
            Money::new(dec!(99), Currency::USD),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            None,
            start(),
        )
        .unwrap();
        h.store.insert_invoice(&june, &june_items).await.unwrap();

        let stats = h.engine.get_billing_stats(user).await.unwrap();

        assert_eq!(stats.total_invoices_this_month, 3);
        assert_eq!(stats.total_amount_this_month, Money::new(dec!(25), Currency::USD));
        assert_eq!(stats.paid_invoices, 2);
        assert_eq!(stats.pending_invoices, 1);
        assert_eq!(stats.failed_invoices, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_policy() {
        let policy = BillingPolicy {
            default_per_diem_rate: Decimal::ZERO,
            ..BillingPolicy::default()
        };
        let result = PerDiemBillingEngine::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(ScriptedGateway::approving()),
            Arc::new(ManualClock::new(start())),
            policy,
        );
        assert!(matches!(result, Err(BillingError::InvalidRate(_))));
    }

    #[tokio::test]
    async fn test_explicit_decline_reason_is_recorded() {
        let gateway = ScriptedGateway::approving();
        gateway.push(Ok(ChargeOutcome::declined("Do not honor"))).await;
        let h = harness(gateway);
        let user = UserId::new();
        seed_contract(&h.store, user, "LC-15", start() - Duration::days(1), 1, Some(dec!(5))).await;
        seed_default_method(&h.store, user).await;

        h.engine.process_automated_billing().await.unwrap();

        let attempts = h.store.payment_attempts().await;
        let attempt = &attempts[0];
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some("Do not honor"));
        assert_eq!(attempt.completed_at, Some(start()));
    }
}
