//! Leasing domain tests

use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use core_kernel::UserId;
use domain_leasing::*;

fn contract(number: &str, free_days: u32) -> LeasingContract {
    LeasingContract::new(
        UserId::new(),
        number,
        "20GP",
        3,
        free_days,
        Some(dec!(5)),
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        "Ningbo",
        "Rotterdam",
        dec!(3000),
    )
    .unwrap()
}

fn container(contract: &LeasingContract, number: &str) -> ContractContainer {
    ContractContainer::picked_up(
        contract.id,
        number,
        "20GP",
        "Ningbo Depot",
        dec!(1000),
        contract.start_date,
    )
}

mod contract_rules {
    use super::*;

    #[test]
    fn test_rejects_empty_contract_number() {
        let result = LeasingContract::new(
            UserId::new(),
            "  ",
            "20GP",
            1,
            7,
            None,
            Utc::now(),
            "A",
            "B",
            dec!(0),
        );
        assert!(matches!(result, Err(LeasingError::InvalidContract(_))));
    }

    #[test]
    fn test_rejects_zero_quantity() {
        let result = LeasingContract::new(
            UserId::new(),
            "LC-1",
            "20GP",
            0,
            7,
            None,
            Utc::now(),
            "A",
            "B",
            dec!(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_not_billable_inside_free_period() {
        let c = contract("LC-100", 10);
        let inside = c.end_date - Duration::hours(1);
        assert!(!c.is_past_free_period(inside));
        assert!(c.days_overdue_at(inside) <= 0);
    }

    #[test]
    fn test_not_billable_at_exact_boundary() {
        let c = contract("LC-101", 10);
        assert!(!c.is_past_free_period(c.end_date));
    }

    #[test]
    fn test_partial_day_counts_as_one() {
        let c = contract("LC-102", 10);
        let now = c.end_date + Duration::hours(3);
        assert!(c.is_past_free_period(now));
        assert_eq!(c.days_overdue_at(now), 1);
        assert_eq!(c.days_overdue_at(c.end_date + Duration::hours(49)), 3);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("expired".parse::<ContractStatus>().unwrap(), ContractStatus::Expired);
        assert!(matches!(
            "cancelled".parse::<ContractStatus>(),
            Err(LeasingError::UnknownStatus(_))
        ));
    }
}

mod grouping {
    use super::*;

    #[test]
    fn test_groups_rows_per_contract_in_first_seen_order() {
        let a = contract("LC-A", 5);
        let b = contract("LC-B", 5);
        let rows = vec![
            (b.clone(), container(&b, "TGHU0000001")),
            (a.clone(), container(&a, "TGHU0000002")),
            (b.clone(), container(&b, "TGHU0000003")),
        ];

        let grouped = group_by_contract(rows);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].contract.contract_number, "LC-B");
        assert_eq!(grouped[0].container_count(), 2);
        assert_eq!(grouped[1].contract.contract_number, "LC-A");
        assert_eq!(grouped[1].container_count(), 1);
    }

    #[test]
    fn test_empty_rows_yield_nothing() {
        assert!(group_by_contract(Vec::new()).is_empty());
    }
}

mod custody {
    use super::*;

    #[test]
    fn test_in_transit_container_can_be_returned() {
        let c = contract("LC-200", 5);
        let mut box1 = container(&c, "MSKU0000001");
        box1.mark_in_transit().unwrap();
        box1.mark_returned(c.end_date).unwrap();
        assert_eq!(box1.status, ContainerStatus::Returned);
        assert_eq!(box1.return_date, Some(c.end_date));
    }

    #[test]
    fn test_returned_container_cannot_move() {
        let c = contract("LC-201", 5);
        let mut box1 = container(&c, "MSKU0000002");
        box1.mark_returned(c.end_date).unwrap();
        assert!(matches!(
            box1.mark_in_transit(),
            Err(LeasingError::InvalidStatusTransition { .. })
        ));
    }
}

mod serialization {
    use super::*;

    #[test]
    fn test_statuses_use_snake_case() {
        assert_eq!(
            serde_json::to_string(&ContainerStatus::PickedUp).unwrap(),
            "\"picked_up\""
        );
        assert_eq!(
            serde_json::to_string(&ContractStatus::Terminated).unwrap(),
            "\"terminated\""
        );
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_instant_past_boundary_is_at_least_one_day_overdue(minutes in 1i64..100_000i64) {
            let c = contract("LC-P", 14);
            let now = c.end_date + Duration::minutes(minutes);
            prop_assert!(c.is_past_free_period(now));
            prop_assert!(c.days_overdue_at(now) >= 1);
            prop_assert!(c.days_overdue_at(now) <= minutes / 1440 + 1);
        }
    }
}
