use std::sync::LazyLock;

use regex::Regex;

// Ordered by precedence; the first pattern that captures wins.
static EPISODE_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)episode\s*(\d{1,3})").unwrap(),
        Regex::new(r"(?i)ep ?(\d{1,2})").unwrap(),
        Regex::new(r"\s(\d{1,2})\s").unwrap(),
        Regex::new(r"-\s*(\d{1,2})\s*$").unwrap(),
    ]
});

pub fn extract_requested_episode(query: &str) -> Option<u32> {
    EPISODE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(query)
            .and_then(|caps| caps.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_keyword_outranks_ep_keyword() {
        assert_eq!(extract_requested_episode("Naruto episode 5 ep 9"), Some(5));
    }

    #[test]
    fn episode_keyword_accepts_three_digits() {
        assert_eq!(extract_requested_episode("one piece Episode 104"), Some(104));
    }

    #[test]
    fn ep_keyword_with_and_without_space() {
        assert_eq!(extract_requested_episode("bleach ep12"), Some(12));
        assert_eq!(extract_requested_episode("bleach EP 7"), Some(7));
    }

    #[test]
    fn standalone_number_between_spaces() {
        assert_eq!(extract_requested_episode("attack on titan 05 1080p"), Some(5));
    }

    #[test]
    fn trailing_hyphen_number() {
        assert_eq!(extract_requested_episode("[Group] Show - 05"), Some(5));
        assert_eq!(extract_requested_episode("Show -12"), Some(12));
    }

    #[test]
    fn no_episode_in_plain_title() {
        assert_eq!(extract_requested_episode("cowboy bebop"), None);
        assert_eq!(extract_requested_episode(""), None);
    }

    #[test]
    fn two_digit_year_is_a_known_false_positive() {
        assert_eq!(extract_requested_episode("movie 20 remaster"), Some(20));
    }
}
