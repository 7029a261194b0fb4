use regex::Regex;
use std::sync::OnceLock;

fn currency_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)inr|rs\.?|₹").expect("invalid currency marker regex"))
}

pub fn cents_to_rupees(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Rounds half away from zero to whole paise.
pub fn rupees_to_cents(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    (value * 100.0).round() as i64
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

pub fn cents_to_rupee_text(cents: i64) -> String {
    format!("{:.2}", cents as f64 / 100.0)
}

/// Parses a money cell into paise. Blank cells are zero; a trailing third
/// decimal is rounded rather than rejected.
pub fn parse_amount_to_cents(raw: &str) -> Result<i64, String> {
    let mut s = raw.trim().to_string();
    if s.is_empty() {
        return Ok(0);
    }
    s = currency_marker_re().replace_all(&s, "").replace([',', ' ', '\u{a0}'], "");
    if s.is_empty() {
        return Ok(0);
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }
    if s.starts_with('-') {
        negative = !negative;
        s = s[1..].to_string();
    } else if s.starts_with('+') {
        s = s[1..].to_string();
    }
    if s.is_empty() {
        return Err(format!("invalid amount: {raw}"));
    }

    let parts = s.split('.').collect::<Vec<_>>();
    if parts.len() > 2 {
        return Err(format!("invalid amount: {raw}"));
    }
    let int_part = if parts[0].is_empty() { "0" } else { parts[0] };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid amount: {raw}"));
    }
    let frac_part = if parts.len() == 2 { parts[1] } else { "" };
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid amount: {raw}"));
    }

    let int_val = int_part
        .parse::<i64>()
        .map_err(|_| format!("amount out of range: {raw}"))?;
    let frac_val = match frac_part.len() {
        0 => 0_i64,
        1 => frac_part.parse::<i64>().unwrap_or(0) * 10,
        2 => frac_part.parse::<i64>().unwrap_or(0),
        _ => {
            let head = frac_part[..2].parse::<i64>().unwrap_or(0);
            let round_up = frac_part.as_bytes()[2] >= b'5';
            head + i64::from(round_up)
        }
    };

    let mut cents = int_val
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| format!("amount out of range: {raw}"))?;
    if negative {
        cents = -cents;
    }
    Ok(cents)
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, last3) = digits.split_at(digits.len() - 3);
    let mut groups = Vec::new();
    let mut rest = head;
    while rest.len() > 2 {
        let (left, right) = rest.split_at(rest.len() - 2);
        groups.push(right);
        rest = left;
    }
    if !rest.is_empty() {
        groups.push(rest);
    }
    groups.reverse();
    format!("{},{}", groups.join(","), last3)
}

/// `₹1,18,000.00`. NaN and infinities render as zero.
pub fn format_inr(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let cents = rupees_to_cents(value);
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let whole = (abs / 100).to_string();
    let frac = abs % 100;
    let sign = if negative { "-" } else { "" };
    format!("{sign}₹{}.{frac:02}", group_indian(&whole))
}

pub fn format_inr_opt(value: Option<f64>) -> String {
    format_inr(value.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_currency_noise() {
        assert_eq!(parse_amount_to_cents("₹1,18,000.00"), Ok(11_800_000));
        assert_eq!(parse_amount_to_cents("Rs. 1,180"), Ok(118_000));
        assert_eq!(parse_amount_to_cents("INR 99.5"), Ok(9_950));
        assert_eq!(parse_amount_to_cents("-250"), Ok(-25_000));
        assert_eq!(parse_amount_to_cents("(250.00)"), Ok(-25_000));
        assert_eq!(parse_amount_to_cents(""), Ok(0));
        assert_eq!(parse_amount_to_cents("152.545"), Ok(15_255));
    }

    #[test]
    fn parse_rejects_non_numbers() {
        assert!(parse_amount_to_cents("abc").is_err());
        assert!(parse_amount_to_cents("1.2.3").is_err());
        assert!(parse_amount_to_cents("-").is_err());
    }

    #[test]
    fn format_uses_indian_grouping() {
        assert_eq!(format_inr(11_800.0), "₹11,800.00");
        assert_eq!(format_inr(118_000.0), "₹1,18,000.00");
        assert_eq!(format_inr(12_345_678.9), "₹1,23,45,678.90");
        assert_eq!(format_inr(999.999), "₹1,000.00");
        assert_eq!(format_inr(-1_500.5), "-₹1,500.50");
        assert_eq!(format_inr(0.0), "₹0.00");
    }

    #[test]
    fn format_renders_non_finite_as_zero() {
        assert_eq!(format_inr(f64::NAN), "₹0.00");
        assert_eq!(format_inr(f64::INFINITY), "₹0.00");
        assert_eq!(format_inr_opt(None), "₹0.00");
    }

    #[test]
    fn cents_round_trip_at_storage_boundary() {
        assert_eq!(rupees_to_cents(1_800.0), 180_000);
        assert_eq!(rupees_to_cents(152.546), 15_255);
        assert_eq!(rupees_to_cents(f64::NAN), 0);
        assert_eq!(cents_to_rupees(15_254), 152.54);
        assert_eq!(cents_to_rupee_text(118_000), "1180.00");
    }
}
