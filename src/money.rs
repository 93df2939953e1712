//! Integer-cent money helpers for the billing screens.

use serde::{Deserialize, Serialize};

/// Invoice composition, all values in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub fee_cents: i64,
    pub total_cents: i64,
}

impl InvoiceTotals {
    /// total = subtotal - discount + fee, `None` when it leaves the `i64` range.
    pub fn checked(subtotal_cents: i64, discount_cents: i64, fee_cents: i64) -> Option<Self> {
        let total_cents = subtotal_cents.checked_sub(discount_cents)?.checked_add(fee_cents)?;
        Some(Self {
            subtotal_cents,
            discount_cents,
            fee_cents,
            total_cents,
        })
    }

    pub fn display(&self) -> TotalsDisplay {
        TotalsDisplay {
            subtotal: format_brl(self.subtotal_cents),
            discount: format_brl(self.discount_cents),
            fee: format_brl(self.fee_cents),
            total: format_brl(self.total_cents),
        }
    }
}

/// Formatted counterpart of [`InvoiceTotals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalsDisplay {
    pub subtotal: String,
    pub discount: String,
    pub fee: String,
    pub total: String,
}

/// Format cents as `R$ 1.234,56`.
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();
    let frac = abs % 100;

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, c) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("{sign}R$ {grouped},{frac:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_subtract_discount_and_add_fee() {
        let totals = InvoiceTotals::checked(9900, 500, 200).unwrap();
        assert_eq!(totals.total_cents, 9600);
        assert_eq!(totals.display().total, "R$ 96,00");
        assert_eq!(totals.display().discount, "R$ 5,00");
    }

    #[test]
    fn totals_out_of_range_are_none() {
        assert!(InvoiceTotals::checked(9900, 0, i64::MAX).is_none());
        assert!(InvoiceTotals::checked(i64::MIN, 1, 0).is_none());
    }

    #[test]
    fn formats_with_thousand_groups() {
        assert_eq!(format_brl(0), "R$ 0,00");
        assert_eq!(format_brl(9600), "R$ 96,00");
        assert_eq!(format_brl(123456), "R$ 1.234,56");
        assert_eq!(format_brl(100000000), "R$ 1.000.000,00");
        assert_eq!(format_brl(-9600), "-R$ 96,00");
    }
}
