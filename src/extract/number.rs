use std::sync::LazyLock;

use regex::Regex;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").unwrap());

/// Parse a French-formatted price fragment ("4 123,5 €/m²") to a whole number.
///
/// Spaces (including narrow and non-breaking ones) are dropped, the first comma is
/// the decimal separator, and the first numeric token is rounded half away from zero.
pub fn parse_price(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.replacen(',', ".", 1);

    let token = NUMBER_RE.find(&cleaned)?.as_str();
    let value: f64 = token.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round();
    if rounded > i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}
