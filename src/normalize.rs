//! Value cleanup for scraped listing fields.
//!
//! Sources render prices and mileage as display strings ("$12,500",
//! "45,120 mi", "Inquire") and spell makes inconsistently. Everything is
//! normalized before it reaches the store so that composite keys coalesce.

use serde_json::Value;

/// Parse a price that may be a number or a display string.
/// Returns None for "Inquire", "Call for price" and anything without digits.
pub fn price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

pub fn mileage(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => parse_amount(s).map(|f| f.round() as i64),
        _ => None,
    }
}

fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .take_while(|c| !c.is_alphabetic())
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

/// Title-case a make or model: "  FORD " -> "Ford", "f-150" -> "F-150".
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;

    for c in s.trim().chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }

    out
}

/// Non-empty trimmed string from a json value; numbers and bools are stringified.
pub fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() { None } else { Some(s) }
}

pub fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn number(value: &Value) -> Option<f64> {
    price(value)
}

pub fn integer(value: &Value) -> Option<i64> {
    mileage(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_handles_display_strings() {
        assert_eq!(price(&json!("$12,500")), Some(12_500.0));
        assert_eq!(price(&json!("$9,999.99")), Some(9_999.99));
        assert_eq!(price(&json!(14000)), Some(14_000.0));
        assert_eq!(price(&json!("Inquire")), None);
        assert_eq!(price(&json!("")), None);
        assert_eq!(price(&Value::Null), None);
    }

    #[test]
    fn mileage_strips_units() {
        assert_eq!(mileage(&json!("45,120 mi")), Some(45_120));
        assert_eq!(mileage(&json!(88000)), Some(88_000));
        assert_eq!(mileage(&json!(1234.6)), Some(1_235));
        assert_eq!(mileage(&json!("n/a")), None);
    }

    #[test]
    fn title_case_normalizes_spelling() {
        assert_eq!(title_case("  FORD "), "Ford");
        assert_eq!(title_case("land rover"), "Land Rover");
        assert_eq!(title_case("f-150"), "F-150");
        assert_eq!(title_case("MERCEDES-BENZ"), "Mercedes-Benz");
    }

    #[test]
    fn flag_accepts_common_encodings() {
        assert_eq!(flag(&json!(true)), Some(true));
        assert_eq!(flag(&json!(0)), Some(false));
        assert_eq!(flag(&json!("yes")), Some(true));
        assert_eq!(flag(&json!("maybe")), None);
    }
}
