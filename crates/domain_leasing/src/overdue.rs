//! Grouping of overdue (contract, container) rows

use crate::container::ContractContainer;
use crate::contract::LeasingContract;

/// An overdue contract together with the outstanding containers found for it
#[derive(Debug, Clone, PartialEq)]
pub struct OverdueContract {
    pub contract: LeasingContract,
    pub containers: Vec<ContractContainer>,
}

impl OverdueContract {
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }
}

/// Folds joined rows into one entry per contract
///
/// Rows arrive from a join of contracts with their outstanding containers,
/// so a contract appears once per qualifying container. Contracts keep the
/// order in which they were first seen.
pub fn group_by_contract(rows: Vec<(LeasingContract, ContractContainer)>) -> Vec<OverdueContract> {
    let mut grouped: Vec<OverdueContract> = Vec::new();

    for (contract, container) in rows {
        match grouped.iter_mut().find(|g| g.contract.id == contract.id) {
            Some(existing) => existing.containers.push(container),
            None => grouped.push(OverdueContract {
                contract,
                containers: vec![container],
            }),
        }
    }

    grouped
}
