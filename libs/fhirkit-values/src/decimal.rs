//! Fixed-point decimal used throughout the value model.
//!
//! FHIRPath decimals are fixed-point with 8 fractional digits.
//! `rust_decimal::Decimal` already stores an explicit scale; we just pin it
//! to 8 on every value that enters the engine so arithmetic never drifts.

pub use rust_decimal::Decimal;

pub const SCALE: u32 = 8;

/// Rescale a decimal to the engine's fixed 8-digit fractional precision.
pub fn normalize(d: Decimal) -> Decimal {
    let mut d = d;
    d.rescale(SCALE);
    d
}

/// Parse a decimal literal (as it appears in FHIRPath source or FHIR XML),
/// normalized to 8 fractional digits.
pub fn parse(text: &str) -> Option<Decimal> {
    text.trim().parse::<Decimal>().ok().map(normalize)
}

/// Integer-valued decimal, normalized.
pub fn from_i64(v: i64) -> Decimal {
    normalize(Decimal::from(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_scale() {
        let d = parse("1.5").unwrap();
        assert_eq!(d.scale(), SCALE);
        assert_eq!(d.to_string(), "1.50000000");
    }

    #[test]
    fn implicit_promotion_equality() {
        // 33 = 33.0 -> true
        let a = from_i64(33);
        let b = parse("33.0").unwrap();
        assert_eq!(a, b);
    }
}
