/// Returns `true` if `sender_id` matches any of `patterns`.
///
/// Matching is case-insensitive. Patterns may use `*` as a wildcard for any
/// run of characters, e.g. `*@bot.example` or `1555*`. An empty pattern list
/// matches nothing.
pub fn matches_any(sender_id: &str, patterns: &[String]) -> bool {
    let sender = sender_id.to_lowercase();
    patterns
        .iter()
        .any(|pattern| glob_match(&pattern.to_lowercase(), &sender))
}

/// `*` matches any (possibly empty) sequence of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut segments = pattern.split('*');
    let Some(first) = segments.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let middle: Vec<&str> = segments.collect();
    let Some((last, middle)) = middle.split_last() else {
        // No wildcard at all.
        return rest.is_empty();
    };

    for segment in middle.iter().filter(|s| !s.is_empty()) {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("bot@s.whatsapp.net", "bot@s.whatsapp.net", true)]
    #[case("BOT@s.whatsapp.net", "bot@s.whatsapp.net", true)]
    #[case("bot@s.whatsapp.net", "bot2@s.whatsapp.net", false)]
    #[case("*@bot.example", "relay@bot.example", true)]
    #[case("*@bot.example", "relay@human.example", false)]
    #[case("1555*", "15551234567", true)]
    #[case("1555*", "4415551234", false)]
    #[case("user_*_admin", "user_123_admin", true)]
    #[case("user_*_admin", "user_123_mod", false)]
    #[case("a*b*c", "abc", true)]
    #[case("a*b*c", "aXbYc", true)]
    #[case("a*b*c", "acb", false)]
    #[case("ab*ba", "aba", false)]
    #[case("*", "anything", true)]
    fn glob(#[case] pattern: &str, #[case] sender: &str, #[case] expected: bool) {
        assert_eq!(matches_any(sender, &[pattern.to_string()]), expected);
    }

    #[test]
    fn empty_list_matches_nothing() {
        assert!(!matches_any("anyone", &[]));
    }
}
