//! Recipient address checks shared by the adapters.

/// Strip the formatting characters people put in phone numbers.
#[must_use]
pub fn normalize_phone(address: &str) -> String {
    address
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// Digits of an international phone number, without the leading `+`.
#[must_use]
pub fn phone_digits(address: &str) -> String {
    normalize_phone(address).trim_start_matches('+').to_string()
}

/// E.164-style check: optional `+`, then 8 to 15 digits.
#[must_use]
pub fn is_phone_number(address: &str) -> bool {
    let normalized = normalize_phone(address);
    let digits = normalized.strip_prefix('+').unwrap_or(&normalized);
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Minimal structural email check (`local@domain.tld`, no whitespace).
#[must_use]
pub fn is_email(address: &str) -> bool {
    let address = address.trim();
    if address.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
