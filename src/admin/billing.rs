//! Invoices and payments.
//!
//! The gateway owns the billing math and status transitions. This screen
//! validates the components, previews totals and applies the date window,
//! which is a client-side filter over each invoice's reference date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agenda::calendar::local_date;
use crate::core_state::CoreState;
use crate::error::{FieldErrors, ServiceError};
use crate::gateway::GatewayError;
use crate::models::{
    Invoice, InvoiceAdjustment, InvoiceQuery, InvoiceStatus, NewInvoice, Payment, PaymentDraft,
};
use crate::money::{format_brl, InvoiceTotals, TotalsDisplay};
use crate::view::require_confirmation;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingFilter {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub org_id: Option<Uuid>,
    /// Inclusive bounds on the local reference date.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl BillingFilter {
    fn query(&self) -> InvoiceQuery {
        InvoiceQuery {
            q: self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(str::to_string),
            status: self.status,
            org_id: self.org_id,
        }
    }

    fn in_window(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

/// An invoice with its totals breakdown and payment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub totals: InvoiceTotals,
    pub display: TotalsDisplay,
    pub payments: Vec<Payment>,
    pub paid_cents: i64,
    pub paid_display: String,
}

/// Create-form totals with their formatted values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoicePreview {
    #[serde(flatten)]
    pub totals: InvoiceTotals,
    pub display: TotalsDisplay,
}

fn check_components(discount_cents: i64, fee_cents: i64) -> Result<(), ServiceError> {
    let mut errors = FieldErrors::new();
    if discount_cents < 0 {
        errors.add("discount_cents", "Discount cannot be negative");
    }
    if fee_cents < 0 {
        errors.add("fee_cents", "Fee cannot be negative");
    }
    errors.into_result()
}

pub fn list_invoices(state: &CoreState, filter: &BillingFilter) -> Result<Vec<Invoice>, ServiceError> {
    state.require_session()?;
    let offset = state.utc_offset();
    let mut invoices = state.gateway().list_invoices(&filter.query())?;
    invoices.retain(|inv| filter.in_window(local_date(inv.reference_instant(), offset)));
    Ok(invoices)
}

fn find_invoice(state: &CoreState, id: Uuid) -> Result<Invoice, ServiceError> {
    state
        .gateway()
        .list_invoices(&InvoiceQuery::default())?
        .into_iter()
        .find(|inv| inv.id == id)
        .ok_or(ServiceError::Gateway(GatewayError::NotFound { entity: "invoice" }))
}

pub fn invoice_detail(state: &CoreState, id: Uuid) -> Result<InvoiceDetail, ServiceError> {
    state.require_session()?;
    let invoice = find_invoice(state, id)?;
    let payments = state.gateway().list_payments(id)?;
    let paid_cents = payments.iter().fold(0i64, |acc, p| acc.saturating_add(p.amount_cents));
    let totals = invoice.totals();
    Ok(InvoiceDetail {
        display: totals.display(),
        totals,
        invoice,
        payments,
        paid_cents,
        paid_display: format_brl(paid_cents),
    })
}

/// Totals shown while the create form is being filled in.
pub fn preview_total(
    state: &CoreState,
    plan_id: Uuid,
    discount_cents: i64,
    fee_cents: i64,
) -> Result<InvoicePreview, ServiceError> {
    check_components(discount_cents, fee_cents)?;
    state.require_session()?;
    let plan = state
        .gateway()
        .list_plans()?
        .into_iter()
        .find(|p| p.id == plan_id)
        .ok_or(GatewayError::NotFound { entity: "plan" })?;
    let Some(totals) = InvoiceTotals::checked(plan.price_cents, discount_cents, fee_cents) else {
        let mut errors = FieldErrors::new();
        errors.add("fee_cents", "Amount is out of range");
        return Err(ServiceError::Validation(errors));
    };
    Ok(InvoicePreview {
        display: totals.display(),
        totals,
    })
}

/// New draft invoice priced from the plan.
pub fn create_invoice(state: &CoreState, new: &NewInvoice) -> Result<Invoice, ServiceError> {
    check_components(new.discount_cents, new.fee_cents)?;
    state.require_session()?;
    let invoice = state.gateway().create_invoice_from_plan(new)?;
    tracing::info!(invoice_id = %invoice.id, org_id = %new.org_id, amount_cents = invoice.amount_cents, "invoice created");
    Ok(invoice)
}

/// Draft to open; the gateway assigns the number.
pub fn open_invoice(state: &CoreState, id: Uuid) -> Result<Invoice, ServiceError> {
    state.require_session()?;
    let invoice = state.gateway().open_invoice(id)?;
    tracing::info!(invoice_id = %id, number = ?invoice.number, "invoice opened");
    Ok(invoice)
}

pub fn adjust_invoice(
    state: &CoreState,
    id: Uuid,
    adjustment: &InvoiceAdjustment,
) -> Result<(), ServiceError> {
    check_components(adjustment.discount_cents, adjustment.fee_cents)?;
    state.require_session()?;
    state.gateway().adjust_invoice(id, adjustment)?;
    tracing::info!(invoice_id = %id, "invoice adjusted");
    Ok(())
}

pub fn register_payment(
    state: &CoreState,
    invoice_id: Uuid,
    payment: &PaymentDraft,
) -> Result<(), ServiceError> {
    if payment.amount_cents <= 0 {
        let mut errors = FieldErrors::new();
        errors.add("amount_cents", "Payment amount must be positive");
        return Err(ServiceError::Validation(errors));
    }
    state.require_session()?;
    state.gateway().create_payment(invoice_id, payment)?;
    tracing::info!(invoice_id = %invoice_id, amount_cents = payment.amount_cents, method = payment.method.as_str(), "payment registered");
    Ok(())
}

/// Negative payment of the full amount; the gateway reopens the invoice.
pub fn refund_invoice(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    state.require_session()?;
    let invoice = find_invoice(state, id)?;
    if invoice.status != InvoiceStatus::Paid {
        return Err(ServiceError::Refused("Only paid invoices can be refunded".into()));
    }
    let refund = PaymentDraft::full_refund(&invoice);
    state.gateway().create_payment(id, &refund)?;
    tracing::info!(invoice_id = %id, amount_cents = refund.amount_cents, "invoice refunded");
    Ok(())
}

pub fn delete_invoice(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    state.require_session()?;
    let invoice = find_invoice(state, id)?;
    if !invoice.status.is_deletable() {
        return Err(ServiceError::Refused(format!(
            "Invoice {} is {} and cannot be deleted",
            invoice.label(),
            invoice.status.as_str()
        )));
    }
    state.gateway().delete_invoice(id)?;
    tracing::info!(invoice_id = %id, "invoice deleted");
    Ok(())
}
