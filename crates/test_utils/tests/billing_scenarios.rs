//! End-to-end billing scenarios over the in-memory adapters

use chrono::Duration;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{Clock, Currency, Money, UserId};
use domain_billing::mock::ScriptedGateway;
use domain_billing::{
    AttemptStatus, BillingPolicy, CampaignType, InvoiceStatus, LedgerStore,
};
use domain_billing::policy::{DEFAULT_PER_DIEM_RATE, MAX_RETRY_DELAY_DAYS};
use test_utils::{
    assert_attempts_sequential, assert_invoice_consistent, assert_invoice_state, assert_money_eq,
    overdue_contract_strategy, BillingHarness, ContainerBuilder, ContractBuilder,
    PaymentMethodBuilder, TemporalFixtures,
};

/// A retry is due strictly after its scheduled instant
fn past_retry(delay: Duration) -> Duration {
    delay + Duration::minutes(1)
}

mod walkthroughs {
    use super::*;

    #[tokio::test]
    async fn two_containers_at_five_dollars_are_billed_and_collected() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().with_number("C1").with_quantity(2).build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 2)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_money_eq(&invoice.total_amount, &Money::new(dec!(10), Currency::USD));
        assert_invoice_state(invoice, InvoiceStatus::Paid, 0);
        assert_eq!(invoice.invoice_number, "PD-C1-20240710");

        let items = h.store.invoice_items().await;
        assert_eq!(items.len(), 2);
        assert_invoice_consistent(invoice, &items);

        let attempts = h.store.payment_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Success);
        assert_attempts_sequential(&attempts);

        assert_eq!(report.invoices_created, 1);
        assert_eq!(report.payments_succeeded, 1);
        assert!(!report.had_errors());
    }

    #[tokio::test]
    async fn three_declines_fail_the_invoice_and_open_one_warning() {
        let h = BillingHarness::with_gateway(ScriptedGateway::declining("Insufficient funds"));
        let contract = ContractBuilder::new().with_quantity(2).build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 2)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();
        let invoice_id = h.store.invoices().await[0].id;

        for _ in 0..2 {
            h.clock.advance(past_retry(Duration::hours(24)));
            h.engine.process_payment_retries().await.unwrap();
        }

        let invoice = h.store.find_invoice(invoice_id).await.unwrap().unwrap();
        assert_invoice_state(&invoice, InvoiceStatus::Failed, 3);
        assert_eq!(invoice.next_retry_at, None);

        let attempts = h.store.find_payment_attempts(invoice_id).await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert_attempts_sequential(&attempts);
        assert!(attempts.iter().all(|a| a.failure_reason.as_deref() == Some("Insufficient funds")));

        let campaigns = h.store.find_dunning_campaigns(invoice_id).await.unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].campaign_type, CampaignType::Warning);

        // A failed invoice is never retried again
        h.clock.advance(Duration::hours(48));
        let sweep = h.engine.process_payment_retries().await.unwrap();
        assert_eq!(sweep.due, 0);
        assert_eq!(h.store.find_payment_attempts(invoice_id).await.unwrap().len(), 3);
    }
}

mod idempotency {
    use super::*;

    #[tokio::test]
    async fn repeated_runs_on_one_day_bill_once() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();
        h.clock.advance(Duration::hours(6));
        let second = h.engine.process_automated_billing().await.unwrap();

        assert_eq!(second.already_billed, 1);
        assert_eq!(h.store.invoices().await.len(), 1);
        assert_eq!(h.gateway.call_count().await, 1);
    }

    #[tokio::test]
    async fn each_new_day_gets_its_own_invoice() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().with_number("C9").build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        for _ in 0..3 {
            h.engine.process_automated_billing().await.unwrap();
            h.advance_days(1);
        }

        let numbers: Vec<String> = h.store.invoices().await.into_iter().map(|i| i.invoice_number).collect();
        assert_eq!(numbers, vec!["PD-C9-20240710", "PD-C9-20240711", "PD-C9-20240712"]);
    }
}

mod eligibility {
    use super::*;

    #[tokio::test]
    async fn free_period_and_returned_containers_are_not_billed() {
        let h = BillingHarness::new();

        let fresh = ContractBuilder::new().with_number("FRESH").within_free_period().build();
        h.seed(fresh.clone(), ContainerBuilder::many(&fresh, 1)).await;

        let returned = ContractBuilder::new().with_number("BACK").build();
        let container = ContainerBuilder::for_contract(&returned)
            .returned_at(TemporalFixtures::billing_instant() - Duration::days(1))
            .build();
        h.seed(returned, vec![container]).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        assert_eq!(report.contracts_discovered, 0);
        assert!(h.store.invoices().await.is_empty());
    }

    #[tokio::test]
    async fn only_outstanding_containers_are_itemised() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().with_quantity(3).build();
        let user = contract.user_id;
        let mut containers = ContainerBuilder::many(&contract, 2);
        containers.push(
            ContainerBuilder::for_contract(&contract)
                .with_serial(999_999)
                .returned_at(TemporalFixtures::billing_instant() - Duration::hours(3))
                .build(),
        );
        h.seed(contract, containers).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();

        let invoices = h.store.invoices().await;
        assert_eq!(invoices[0].container_count, 2);
        assert_invoice_consistent(&invoices[0], &h.store.invoice_items().await);
    }

    #[tokio::test]
    async fn missing_rate_falls_back_to_default() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().with_rate(None).build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();

        let invoice = &h.store.invoices().await[0];
        assert_eq!(invoice.per_diem_rate.amount(), DEFAULT_PER_DIEM_RATE);
    }
}

mod payment_methods {
    use super::*;

    #[tokio::test]
    async fn newest_default_active_method_is_charged() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;

        let old = PaymentMethodBuilder::for_user(user)
            .with_token(Some("tok_old"))
            .created_at(TemporalFixtures::billing_instant() - Duration::days(200))
            .build();
        let newest = PaymentMethodBuilder::for_user(user)
            .with_token(Some("tok_new"))
            .created_at(TemporalFixtures::billing_instant() - Duration::days(5))
            .build();
        let inactive = PaymentMethodBuilder::for_user(user)
            .with_token(Some("tok_dead"))
            .created_at(TemporalFixtures::billing_instant() - Duration::days(1))
            .inactive()
            .build();
        let secondary = PaymentMethodBuilder::for_user(user)
            .with_token(Some("tok_backup"))
            .not_default()
            .build();
        for method in [old, newest.clone(), inactive, secondary] {
            h.seed_method(method).await;
        }

        h.engine.process_automated_billing().await.unwrap();

        let requests = h.gateway.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payment_method_ref, "tok_new");
        assert_eq!(h.store.invoices().await[0].payment_method_id, Some(newest.id));
    }

    #[tokio::test]
    async fn lessee_without_method_gets_reminder_and_no_charge() {
        let h = BillingHarness::new();
        let contract = ContractBuilder::new().build();
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        let invoice = &h.store.invoices().await[0];
        assert_invoice_state(invoice, InvoiceStatus::Pending, 0);
        assert_eq!(invoice.payment_method_id, None);
        assert_eq!(h.gateway.call_count().await, 0);

        let campaigns = h.store.dunning_campaigns().await;
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].campaign_type, CampaignType::Reminder);
        assert_eq!(report.dunning_campaigns_opened, 1);
    }

    #[tokio::test]
    async fn retry_for_deactivated_method_is_skipped() {
        let h = BillingHarness::with_gateway(ScriptedGateway::declining("Do not honor"));
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        let method = PaymentMethodBuilder::for_user(user).build();
        h.seed_method(method.clone()).await;

        h.engine.process_automated_billing().await.unwrap();
        h.store.deactivate_payment_method(method.id).await;
        h.clock.advance(Duration::hours(25));

        let sweep = h.engine.process_payment_retries().await.unwrap();

        assert_eq!(sweep.skipped_without_payment_method, 1);
        assert!(sweep.outcomes.is_empty());
        let invoice = &h.store.invoices().await[0];
        assert_invoice_state(invoice, InvoiceStatus::Pending, 1);
    }
}

mod isolation {
    use super::*;

    #[tokio::test]
    async fn one_broken_contract_does_not_stop_the_others() {
        let h = BillingHarness::new();
        let user = UserId::new();
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        let broken = ContractBuilder::new().with_user(user).with_number("BROKEN").build();
        let healthy = ContractBuilder::new().with_user(user).with_number("HEALTHY").build();
        h.seed(broken.clone(), ContainerBuilder::many(&broken, 1)).await;
        h.seed(healthy.clone(), ContainerBuilder::many(&healthy, 1)).await;
        h.store.fail_container_lookups_for(broken.id).await;

        let report = h.engine.process_automated_billing().await.unwrap();

        assert_eq!(report.contracts_discovered, 2);
        assert_eq!(report.contract_errors, 1);
        assert_eq!(report.invoices_created, 1);
        assert_eq!(h.store.invoices().await[0].invoice_number, "PD-HEALTHY-20240710");
    }

    #[tokio::test]
    async fn exponential_backoff_spaces_retries() {
        let policy = BillingPolicy {
            backoff_multiplier: dec!(2),
            ..BillingPolicy::default()
        };
        let h = BillingHarness::with(ScriptedGateway::declining("Card declined"), policy);
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();
        let first = h.store.invoices().await[0].clone();
        assert_eq!(first.next_retry_at, Some(TemporalFixtures::billing_instant() + Duration::hours(24)));

        h.clock.advance(past_retry(Duration::hours(24)));
        h.engine.process_payment_retries().await.unwrap();
        let second = h.store.find_invoice(first.id).await.unwrap().unwrap();
        assert_eq!(second.retry_count, 2);
        assert_eq!(
            second.next_retry_at,
            Some(TemporalFixtures::billing_instant() + past_retry(Duration::hours(24)) + Duration::hours(48))
        );
    }

    #[tokio::test]
    async fn steep_backoff_runs_every_retry_without_overflow() {
        let policy = BillingPolicy {
            max_retry_attempts: 12,
            backoff_multiplier: dec!(10),
            ..BillingPolicy::default()
        };
        let h = BillingHarness::with(ScriptedGateway::declining("Card declined"), policy);
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

        h.engine.process_automated_billing().await.unwrap();
        let invoice_id = h.store.invoices().await[0].id;

        for _ in 1..12 {
            let invoice = h.store.find_invoice(invoice_id).await.unwrap().unwrap();
            let due = invoice.next_retry_at.expect("retry scheduled");
            assert!(due - h.clock.now() <= Duration::days(MAX_RETRY_DELAY_DAYS));
            h.clock.advance(due - h.clock.now() + Duration::minutes(1));
            let sweep = h.engine.process_payment_retries().await.unwrap();
            assert_eq!(sweep.errors, 0);
        }

        let invoice = h.store.find_invoice(invoice_id).await.unwrap().unwrap();
        assert_invoice_state(&invoice, InvoiceStatus::Failed, 12);
        assert_attempts_sequential(&h.store.find_payment_attempts(invoice_id).await.unwrap());
    }
}

mod retry_timing {
    use super::*;

    #[tokio::test]
    async fn retry_is_due_only_after_its_scheduled_instant() {
        let h = BillingHarness::with_gateway(ScriptedGateway::declining("Card declined"));
        let contract = ContractBuilder::new().build();
        let user = contract.user_id;
        h.seed(contract.clone(), ContainerBuilder::many(&contract, 1)).await;
        h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;
        h.engine.process_automated_billing().await.unwrap();

        h.clock.advance(Duration::hours(24));
        let on_time = h.engine.process_payment_retries().await.unwrap();
        assert_eq!(on_time.due, 0);

        h.clock.advance(Duration::seconds(1));
        let after = h.engine.process_payment_retries().await.unwrap();
        assert_eq!(after.due, 1);
        assert_eq!(h.store.invoices().await[0].retry_count, 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_overdue_contract_is_billed_consistently((contract, containers) in overdue_contract_strategy(6)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = BillingHarness::new();
            let user = contract.user_id;
            let expected_rate = contract.effective_per_diem_rate(DEFAULT_PER_DIEM_RATE);
            let count = containers.len() as u32;
            h.seed(contract, containers).await;
            h.seed_method(PaymentMethodBuilder::for_user(user).build()).await;

            h.engine.process_automated_billing().await.unwrap();

            let invoices = h.store.invoices().await;
            assert_eq!(invoices.len(), 1);
            let invoice = &invoices[0];
            assert_invoice_consistent(invoice, &h.store.invoice_items().await);
            assert_eq!(invoice.total_amount.amount(), expected_rate * Decimal::from(count));
            assert_eq!(invoice.status, InvoiceStatus::Paid);
        });
    }
}
