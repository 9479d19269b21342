//! Minor-unit money arithmetic.
//!
//! Every amount in the engine is an integer count of the currency's smallest
//! unit (pence, cents). Percentages round half-up to the nearest minor unit,
//! so totals are exact and reproducible without any floating-point involvement.

/// Computes the marketplace service fee for an items subtotal.
///
/// The fee is `fee_bps` basis points of the subtotal, rounded half-up to the
/// nearest minor unit, with `min_fee_minor` as a lower bound. A £100.00
/// subtotal at 250 bps yields £2.50; a £10.00 subtotal yields 25p which the
/// default 50p floor lifts to £0.50.
#[must_use]
pub const fn service_fee(subtotal_minor: i64, fee_bps: i64, min_fee_minor: i64) -> i64 {
    let fee = (subtotal_minor * fee_bps + 5_000) / 10_000;
    if fee < min_fee_minor { min_fee_minor } else { fee }
}

/// Formats a minor-unit amount for human-readable conversation events.
///
/// Known currencies get their symbol (`£90.00`); anything else falls back to
/// the ISO code (`SEK 90.00`).
#[must_use]
pub fn format_minor(amount_minor: i64, currency: &str) -> String {
    let major = amount_minor / 100;
    let cents = (amount_minor % 100).abs();
    match currency {
        "GBP" => format!("£{major}.{cents:02}"),
        "USD" => format!("${major}.{cents:02}"),
        "EUR" => format!("€{major}.{cents:02}"),
        other => format!("{other} {major}.{cents:02}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_fee_standard_rate() {
        // £100.00 at 2.5% is exactly £2.50
        assert_eq!(service_fee(10_000, 250, 50), 250);
    }

    #[test]
    fn test_service_fee_floor_applies() {
        // £10.00 at 2.5% is 25p, lifted to the 50p floor
        assert_eq!(service_fee(1_000, 250, 50), 50);
    }

    #[test]
    fn test_service_fee_rounds_half_up() {
        // £101.00 at 2.5% is 252.5p, which rounds up
        assert_eq!(service_fee(10_100, 250, 0), 253);
        // £100.40 at 2.5% is 251p exactly
        assert_eq!(service_fee(10_040, 250, 0), 251);
    }

    #[test]
    fn test_service_fee_zero_subtotal_hits_floor() {
        assert_eq!(service_fee(0, 250, 50), 50);
    }

    #[test]
    fn test_format_known_currencies() {
        assert_eq!(format_minor(9_000, "GBP"), "£90.00");
        assert_eq!(format_minor(1_250, "USD"), "$12.50");
        assert_eq!(format_minor(5, "EUR"), "€0.05");
    }

    #[test]
    fn test_format_unknown_currency_uses_code() {
        assert_eq!(format_minor(9_000, "SEK"), "SEK 90.00");
    }
}
