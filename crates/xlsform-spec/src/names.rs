use std::sync::LazyLock;

use regex::Regex;

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("name pattern is valid")
});

/// Whether `name` is usable as an XLSForm question, list, or form identifier.
pub fn is_valid_name(name: &str) -> bool {
    NAME.is_match(name)
}

/// Derives an identifier from a human label: `"Head of household?"` becomes
/// `head_of_household`.
pub fn name_from_label(label: &str) -> String {
    let mut cleaned = String::with_capacity(label.len());
    let mut last_was_sep = true;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            cleaned.push('_');
            last_was_sep = true;
        }
    }
    while cleaned.ends_with('_') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        return "question".into();
    }
    if cleaned.starts_with(|ch: char| ch.is_ascii_digit()) {
        cleaned.insert(0, '_');
    }
    cleaned
}

/// Appends `_2`, `_3`, ... until `taken` no longer claims the name.
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|suffix| format!("{}_{}", base, suffix))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_xlsform_names() {
        assert!(is_valid_name("household_size"));
        assert!(is_valid_name("_q1.a-b"));
        assert!(!is_valid_name("1st"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn derives_names_from_labels() {
        assert_eq!(name_from_label("Head of household?"), "head_of_household");
        assert_eq!(name_from_label("  2nd visit  "), "_2nd_visit");
        assert_eq!(name_from_label("¿¡!"), "question");
    }

    #[test]
    fn unique_name_appends_suffix() {
        let taken = ["age", "age_2"];
        assert_eq!(unique_name("age", |name| taken.contains(&name)), "age_3");
        assert_eq!(unique_name("sex", |name| taken.contains(&name)), "sex");
    }
}
