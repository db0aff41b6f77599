use super::ExecutionError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Convert through the shortest round-trip string so `0.135` stays `0.135`
pub fn to_decimal(value: f64) -> Result<Decimal, ExecutionError> {
    if !value.is_finite() {
        return Err(ExecutionError::InvalidNumber(value.to_string()));
    }
    Decimal::from_str(&value.to_string())
        .map_err(|_| ExecutionError::InvalidNumber(value.to_string()))
}

/// Floor to a multiple of `step`; never rounds up
pub fn floor_to_step(value: f64, step: Decimal) -> Result<Decimal, ExecutionError> {
    let value = to_decimal(value)?;
    if step <= Decimal::ZERO {
        return Ok(value);
    }
    Ok((value / step).floor() * step)
}

/// Round to the nearest multiple of `tick`, halves away from zero
pub fn round_to_tick(value: f64, tick: Decimal) -> Result<Decimal, ExecutionError> {
    let value = to_decimal(value)?;
    if tick <= Decimal::ZERO {
        return Ok(value);
    }
    let ticks = (value / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Ok(ticks * tick)
}

/// Fixed-point string with exactly `precision` decimals
pub fn format_fixed(value: Decimal, precision: u32) -> String {
    let mut value = value;
    value.rescale(precision);
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_quantity_floor() {
        let q = floor_to_step(0.1357, dec("0.01")).unwrap();
        assert_eq!(format_fixed(q, 2), "0.13");
    }

    #[test]
    fn test_quantity_floor_exact_multiple() {
        // 0.135 / 0.001 is 134.999... in binary floating point
        let q = floor_to_step(0.135, dec("0.001")).unwrap();
        assert_eq!(format_fixed(q, 3), "0.135");
    }

    #[test]
    fn test_quantity_floor_below_step_is_zero() {
        let q = floor_to_step(0.0009, dec("0.001")).unwrap();
        assert!(q.is_zero());
        assert_eq!(format_fixed(q, 3), "0.000");
    }

    #[test]
    fn test_quantity_whole_step() {
        let q = floor_to_step(57.9, dec("1")).unwrap();
        assert_eq!(format_fixed(q, 0), "57");
    }

    #[test]
    fn test_price_rounding() {
        let p = round_to_tick(3000.1234, dec("0.1")).unwrap();
        assert_eq!(format_fixed(p, 1), "3000.1");
        assert_eq!(format_fixed(p, 2), "3000.10");
    }

    #[test]
    fn test_price_rounding_half_away_from_zero() {
        let p = round_to_tick(2000.005, dec("0.01")).unwrap();
        assert_eq!(format_fixed(p, 2), "2000.01");

        let p = round_to_tick(1940.0049, dec("0.01")).unwrap();
        assert_eq!(format_fixed(p, 2), "1940.00");
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(to_decimal(f64::NAN).is_err());
        assert!(floor_to_step(f64::INFINITY, dec("0.01")).is_err());
    }
}
