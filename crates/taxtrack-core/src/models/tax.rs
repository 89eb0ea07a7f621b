//! Year-to-date tax summary returned by `/tax/summary`.

use serde::{Deserialize, Serialize};

/// One quarterly estimated-tax payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlyEstimate {
    /// Quarter number, 1 through 4
    pub quarter: u8,
    /// Due date as an ISO date string (YYYY-MM-DD)
    pub due_date: String,
    pub amount: f64,
    #[serde(default)]
    pub paid: bool,
}

impl QuarterlyEstimate {
    pub fn label(&self) -> String {
        format!("Q{}", self.quarter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSummary {
    #[serde(default)]
    pub ytd_income: f64,
    #[serde(default)]
    pub ytd_deductions: f64,
    #[serde(default)]
    pub ytd_profit: f64,
    pub current_quarter: u8,
    #[serde(default)]
    pub quarterly_estimates: Vec<QuarterlyEstimate>,
    #[serde(default)]
    pub next_deadline: Option<String>,
    #[serde(default)]
    pub items_needing_review: u32,
    #[serde(default)]
    pub connected_accounts: u32,
}

impl TaxSummary {
    /// Zeroed summary shown when the real one cannot be loaded.
    pub fn placeholder() -> Self {
        Self {
            ytd_income: 0.0,
            ytd_deductions: 0.0,
            ytd_profit: 0.0,
            current_quarter: 1,
            quarterly_estimates: Vec::new(),
            next_deadline: None,
            items_needing_review: 0,
            connected_accounts: 0,
        }
    }
}

impl Default for TaxSummary {
    fn default() -> Self {
        Self::placeholder()
    }
}
