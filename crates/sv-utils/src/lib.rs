//! Shared string helpers for the site visit crates.

/// Case-insensitive substring test. An empty needle matches everything.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Replace tabs and line breaks with single spaces so a value fits on one delimited row.
pub fn flatten_field(value: &str) -> String {
    let mut flat = String::with_capacity(value.len());
    let mut last_space = false;
    for ch in value.chars() {
        if matches!(ch, '\t' | '\n' | '\r') {
            if !last_space {
                flat.push(' ');
            }
            last_space = true;
        } else {
            flat.push(ch);
            last_space = false;
        }
    }
    flat
}

/// Cut `value` to at most `width` characters, marking the cut with an ellipsis.
pub fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut cut: String = value.chars().take(width - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_ignores_case() {
        assert!(contains_ignore_case("CoolAir HVAC", "hvac"));
        assert!(contains_ignore_case("CoolAir HVAC", ""));
        assert!(!contains_ignore_case("CoolAir HVAC", "plumb"));
    }

    #[test]
    fn flatten_collapses_breaks() {
        assert_eq!(flatten_field("a\tb\r\nc"), "a b c");
        assert_eq!(flatten_field("plain"), "plain");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("Electrical", 20), "Electrical");
        assert_eq!(truncate("Electrical", 5), "Elec…");
        assert_eq!(truncate("Electrical", 0), "");
    }
}
