const ALLOWED_PUNCTUATION: [char; 4] = ['.', ',', '?', '!'];

/// Unicode whitespace plus the ASCII file, group, record and unit
/// separators (U+001C..=U+001F).
fn is_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Replaces every character that is not alphanumeric, whitespace or one of
/// `. , ? !` with a space, then trims the ends.
pub fn clean_text(text: &str) -> String {
    tracing::debug!("Original text: {}", text);

    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || is_space(c) || ALLOWED_PUNCTUATION.contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    tracing::debug!("Cleaned text: {}", cleaned);
    cleaned.trim_matches(is_space).to_string()
}
