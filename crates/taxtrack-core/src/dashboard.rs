//! Dashboard data: the tax summary plus the figures derived from it.

use chrono::NaiveDate;
use tracing::warn;

use crate::api::{api_error_message, ApiClient};
use crate::models::{QuarterlyEstimate, TaxSummary};
use crate::utils::format_deadline;

/// What the dashboard shows. When the summary could not be loaded it holds
/// a zeroed placeholder and the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub summary: TaxSummary,
    pub error: Option<String>,
}

impl Dashboard {
    pub fn loaded(summary: TaxSummary) -> Self {
        Self {
            summary,
            error: None,
        }
    }

    pub fn placeholder(error: impl Into<String>) -> Self {
        Self {
            summary: TaxSummary::placeholder(),
            error: Some(error.into()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }

    /// Total of all quarterly estimates for the year
    pub fn estimated_annual_tax(&self) -> f64 {
        self.summary.quarterly_estimates.iter().map(|q| q.amount).sum()
    }

    pub fn paid_to_date(&self) -> f64 {
        self.summary
            .quarterly_estimates
            .iter()
            .filter(|q| q.paid)
            .map(|q| q.amount)
            .sum()
    }

    pub fn remaining_due(&self) -> f64 {
        (self.estimated_annual_tax() - self.paid_to_date()).max(0.0)
    }

    /// Estimated tax as a share of year-to-date income
    pub fn effective_rate(&self) -> Option<f64> {
        if self.summary.ytd_income > 0.0 {
            Some(self.estimated_annual_tax() / self.summary.ytd_income)
        } else {
            None
        }
    }

    /// Earliest quarter not yet paid
    pub fn next_unpaid_estimate(&self) -> Option<&QuarterlyEstimate> {
        self.summary
            .quarterly_estimates
            .iter()
            .filter(|q| !q.paid)
            .min_by_key(|q| q.quarter)
    }

    /// Relative description of the next deadline, falling back to the due
    /// date of the next unpaid quarter.
    pub fn deadline_label(&self, today: NaiveDate) -> Option<String> {
        let date = self
            .summary
            .next_deadline
            .as_deref()
            .or_else(|| self.next_unpaid_estimate().map(|q| q.due_date.as_str()))?;
        Some(format_deadline(date, today))
    }
}

/// Load the dashboard. Never fails: any error yields a placeholder so the
/// view is never left waiting.
pub async fn load_dashboard(client: &ApiClient) -> Dashboard {
    match client.fetch_tax_summary().await {
        Ok(summary) => Dashboard::loaded(summary),
        Err(e) => {
            warn!(error = %e, "Failed to load tax summary, showing placeholder");
            Dashboard::placeholder(api_error_message(&e))
        }
    }
}
