//! Dunning campaigns
//!
//! A campaign records that an invoice could not be collected automatically.
//! Sending the actual emails, calls and notices is left to whatever reads
//! these records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{DunningCampaignId, InvoiceId, UserId};

use crate::error::BillingError;
use crate::invoice::PerDiemInvoice;

/// Escalation stage, ordered from mildest to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    /// Opened when the lessee has no usable payment method
    Reminder,
    /// Opened when automatic retries are exhausted
    Warning,
    FinalNotice,
    Collection,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Reminder => "reminder",
            CampaignType::Warning => "warning",
            CampaignType::FinalNotice => "final_notice",
            CampaignType::Collection => "collection",
        }
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(CampaignType::Reminder),
            "warning" => Ok(CampaignType::Warning),
            "final_notice" => Ok(CampaignType::FinalNotice),
            "collection" => Ok(CampaignType::Collection),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

/// Campaign lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

/// Escalation record for an uncollected invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningCampaign {
    pub id: DunningCampaignId,
    pub user_id: UserId,
    pub invoice_id: InvoiceId,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_action_date: DateTime<Utc>,
    pub emails_sent: u32,
    pub calls_made: u32,
    pub notices_sent: u32,
}

impl DunningCampaign {
    /// Opens an active campaign with zeroed counters
    pub fn open(
        invoice: &PerDiemInvoice,
        campaign_type: CampaignType,
        follow_up: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DunningCampaignId::new_v7(),
            user_id: invoice.user_id,
            invoice_id: invoice.id,
            campaign_type,
            status: CampaignStatus::Active,
            start_date: now,
            end_date: None,
            next_action_date: now + follow_up,
            emails_sent: 0,
            calls_made: 0,
            notices_sent: 0,
        }
    }

    /// Whether opening `next` after this campaign would move escalation forward
    pub fn is_superseded_by(&self, next: CampaignType) -> bool {
        next > self.campaign_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_order() {
        assert!(CampaignType::Reminder < CampaignType::Warning);
        assert!(CampaignType::Warning < CampaignType::FinalNotice);
        assert!(CampaignType::FinalNotice < CampaignType::Collection);
    }

    #[test]
    fn test_campaign_type_parse() {
        assert_eq!("final_notice".parse::<CampaignType>().unwrap(), CampaignType::FinalNotice);
        assert!("escalate".parse::<CampaignType>().is_err());
    }
}
