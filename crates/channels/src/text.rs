//! Text shaping helpers shared by the platform adapters.

/// Truncate to `max` characters, ending in `"..."` when cut. Discord's
/// 2000-char limit becomes a 1997-char body plus the ellipsis.
pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Split a reply into chunks of at most `max` characters, preferring
/// paragraph, then line, then sentence, then word boundaries.
pub fn split_reply(text: &str, max: usize) -> Vec<String> {
    if max == 0 || text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max {
            chunks.push(remaining.to_string());
            break;
        }

        let byte_max = remaining
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let slice = &remaining[..byte_max];
        let split_at = slice
            .rfind("\n\n")
            .map(|p| p + 1)
            .or_else(|| slice.rfind('\n').map(|p| p + 1))
            .or_else(|| slice.rfind(". ").map(|p| p + 1))
            .or_else(|| slice.rfind(' '))
            .unwrap_or(byte_max);

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.trim_end().to_string());
        remaining = rest.trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_with_ellipsis("hello", 2000), "hello");
    }

    #[test]
    fn long_text_truncates_to_limit_with_ellipsis() {
        let long = "x".repeat(2100);
        let out = truncate_with_ellipsis(&long, 2000);
        assert_eq!(out.chars().count(), 2000);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().take(1997).collect::<String>(), "x".repeat(1997));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(50);
        let out = truncate_with_ellipsis(&long, 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn split_prefers_paragraph_boundaries() {
        let text = "First paragraph.\n\nSecond paragraph.";
        assert_eq!(
            split_reply(text, 25),
            vec!["First paragraph.", "Second paragraph."]
        );
    }

    #[test]
    fn split_falls_back_to_words() {
        assert_eq!(
            split_reply("abcdef ghijkl mnopqr", 12),
            vec!["abcdef", "ghijkl", "mnopqr"]
        );
    }

    #[test]
    fn zero_max_means_no_split() {
        assert_eq!(split_reply("anything at all", 0), vec!["anything at all"]);
    }
}
