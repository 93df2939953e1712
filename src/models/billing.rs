use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{InvoiceStatus, PaymentMethod};
use crate::money::InvoiceTotals;

/// Payment reference recorded by a full refund.
pub const REFUND_REFERENCE: &str = "refund-full";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub org_id: Uuid,
    #[serde(default)]
    pub number: Option<String>,
    pub status: InvoiceStatus,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub amount_cents: i64,
    pub subtotal_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub fee_cents: i64,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    super::plan::DEFAULT_CURRENCY.to_string()
}

impl Invoice {
    /// Breakdown with the stored amount as the total.
    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals {
            subtotal_cents: self.subtotal_cents,
            discount_cents: self.discount_cents,
            fee_cents: self.fee_cents,
            total_cents: self.amount_cents,
        }
    }

    /// Number when assigned, id otherwise.
    pub fn label(&self) -> String {
        self.number.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Date the billing window filters on.
    pub fn reference_instant(&self) -> DateTime<Utc> {
        self.due_at.unwrap_or(self.issued_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
}

impl PaymentDraft {
    /// Negative full-amount manual payment that reopens a paid invoice.
    pub fn full_refund(invoice: &Invoice) -> Self {
        Self {
            amount_cents: -invoice.amount_cents.abs(),
            method: PaymentMethod::Manual,
            reference: Some(REFUND_REFERENCE.to_string()),
        }
    }
}

/// Invoice created from a plan's price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub org_id: Uuid,
    pub plan_id: Uuid,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub fee_cents: i64,
}

/// Editable fields of an open invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAdjustment {
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    pub discount_cents: i64,
    pub fee_cents: i64,
}

/// Server-side list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub org_id: Option<Uuid>,
}
