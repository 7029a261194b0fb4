use serde::Serialize;

use crate::billing_cycle::{cycle_of, BillingCycle, SpaceCategory};
use crate::period::PeriodKey;

#[derive(Debug, Clone, Serialize)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub category: SpaceCategory,
    pub price: f64,
    pub is_available: bool,
}

impl Space {
    pub fn billing_cycle(&self) -> BillingCycle {
        cycle_of(&self.category)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Customer {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub company_name: Option<String>,
    pub gst_liable: bool,
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Customer {
    /// First + last name when either is set, else the single name field,
    /// else the company. Empty string when nothing is populated.
    pub fn display_name(&self) -> String {
        let full = [non_empty(&self.first_name), non_empty(&self.last_name)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return full;
        }
        non_empty(&self.name)
            .or_else(|| non_empty(&self.company_name))
            .unwrap_or_default()
            .to_string()
    }

    /// Every non-empty way the customer might be written on an invoice.
    pub fn name_variants(&self) -> Vec<String> {
        let mut out = Vec::new();
        let display = self.display_name();
        let candidates = [
            Some(display.as_str()),
            non_empty(&self.name),
            non_empty(&self.first_name),
            non_empty(&self.last_name),
            non_empty(&self.company_name),
        ];
        for candidate in candidates.into_iter().flatten() {
            if !candidate.is_empty() && !out.iter().any(|v: &String| v == candidate) {
                out.push(candidate.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Inactive,
    Completed,
}

impl AssignmentStatus {
    /// Unrecognised statuses are treated as not accruing rent.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "active" => AssignmentStatus::Active,
            "completed" => AssignmentStatus::Completed,
            _ => AssignmentStatus::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Inactive => "inactive",
            AssignmentStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub id: String,
    pub customer: Customer,
    pub space: Space,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: AssignmentStatus,
    pub monthly_price: Option<f64>,
    pub gst_included: bool,
    pub payment_destination: Option<String>,
}

impl Assignment {
    /// Override price when set to something positive, else the space list price.
    pub fn base_price(&self) -> f64 {
        match self.monthly_price {
            Some(price) if price > 0.0 => price,
            _ => self.space.price,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    pub assignment_id: Option<String>,
    /// Joined through the assignment; absent for ad hoc entries.
    pub customer: Option<Customer>,
    pub payer_name: Option<String>,
    pub amount: f64,
    pub gst_amount: f64,
    pub payment_date: Option<String>,
    pub paid_for_month: Option<String>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

impl Payment {
    pub fn base_amount(&self) -> f64 {
        self.amount - self.gst_amount
    }

    pub fn has_gst(&self) -> bool {
        self.gst_amount > 0.0
    }

    pub fn paid_for_period(&self) -> Option<PeriodKey> {
        self.paid_for_month.as_deref().and_then(PeriodKey::parse)
    }

    pub fn receipt_period(&self) -> Option<PeriodKey> {
        self.payment_date.as_deref().and_then(PeriodKey::parse)
    }

    /// Month the money belongs to for reconciliation: receipt date first.
    pub fn ledger_period(&self) -> Option<PeriodKey> {
        self.receipt_period().or_else(|| self.paid_for_period())
    }

    pub fn customer_name(&self) -> String {
        if let Some(customer) = &self.customer {
            let name = customer.display_name();
            if !name.is_empty() {
                return name;
            }
        }
        non_empty(&self.payer_name).unwrap_or_default().to_string()
    }

    pub fn name_variants(&self) -> Vec<String> {
        let mut out = self
            .customer
            .as_ref()
            .map(Customer::name_variants)
            .unwrap_or_default();
        if let Some(payer) = non_empty(&self.payer_name) {
            if !out.iter().any(|v| v == payer) {
                out.push(payer.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalInvoice {
    pub id: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub customer_name: String,
    pub total_amount: f64,
    pub base_amount: f64,
    pub gst_amount: f64,
    pub month_key: String,
}

impl ExternalInvoice {
    pub fn has_gst(&self) -> bool {
        self.gst_amount > 0.0
    }

    pub fn period(&self) -> Option<PeriodKey> {
        PeriodKey::parse(&self.month_key).or_else(|| PeriodKey::parse(&self.invoice_date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualLink {
    pub payment_id: String,
    pub invoice_id: String,
}
