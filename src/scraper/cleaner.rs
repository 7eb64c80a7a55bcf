// ── Price normalisation ───────────────────────────────────────────────────────

/// Parse a locale-formatted price into a number.
///
/// Keeps only digits, `,` and `.`. When both separators appear the rightmost
/// one is the decimal point and the other is thousands grouping. A lone comma
/// is a decimal point; repeated periods with no comma are all grouping.
/// "R$ 1.234,56" → 1234.56 | "$1,234.56" → 1234.56 | "19,90" → 19.9
pub fn normalize_price(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let canonical = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (Some(_), None) => cleaned.replace(',', "."),
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    canonical.parse().ok()
}

/// Trimmed text, or `None` when nothing is left.
pub fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
