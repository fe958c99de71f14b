pub const FALLBACK_TITLE: &str = "New conversation";

const TITLE_WORD_COUNT: usize = 3;

/// Title for a session, taken from the first words of its first message.
pub fn derive_title(text: &str) -> String {
    let words = text
        .split_whitespace()
        .take(TITLE_WORD_COUNT)
        .collect::<Vec<_>>();

    if words.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_three_words() {
        assert_eq!(
            derive_title("I dreamed about flying over mountains"),
            "I dreamed about"
        );
        assert_eq!(derive_title("  snakes\n\tin   water "), "snakes in water");
        assert_eq!(derive_title("falling"), "falling");
    }

    #[test]
    fn blank_text_falls_back() {
        assert_eq!(derive_title(" \n "), FALLBACK_TITLE);
    }
}
