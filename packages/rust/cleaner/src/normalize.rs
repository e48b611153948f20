//! Text normalization shared by every field parser.

/// Fold full-width ASCII forms and the ideographic space to half-width,
/// collapse whitespace runs, and trim.
pub fn normalize_text(input: &str) -> String {
    let folded: String = input.chars().map(fold_width).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text, lowercased; used for hashing and matching.
pub fn normalize_key(input: &str) -> String {
    normalize_text(input).to_lowercase()
}

/// Map one character to its half-width form where one exists.
pub fn fold_width(c: char) -> char {
    match c {
        '\u{3000}' | '\u{00A0}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        _ => c,
    }
}
