/// Current time as Unix milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Cut a string to at most `max` characters, appending "…" when something
/// was dropped. Works on char boundaries so multi-byte text stays valid.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

/// Single-line title derived from free text: first line, whitespace
/// collapsed, at most `max` chars including the ellipsis.
pub fn title_from(text: &str, max: usize) -> String {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let collapsed = first.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        truncate_chars(&collapsed, max.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn long_string_gets_ellipsis() {
        assert_eq!(truncate_chars("hello world", 5), "hello…");
    }

    #[test]
    fn multibyte_truncate() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll…");
    }

    #[test]
    fn title_skips_blank_lines() {
        assert_eq!(title_from("\n\n  plan   the\tlaunch  \nmore", 60), "plan the launch");
    }

    #[test]
    fn title_is_capped() {
        assert_eq!(title_from("abcdefgh", 3), "ab…");
        assert_eq!(title_from("abc", 3), "abc");
    }
}
