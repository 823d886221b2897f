//! Line/column bookkeeping over mutated source text.
//!
//! Line numbers honor `#line` directives: the nearest preceding directive
//! resets the count, which keeps diagnostics pointing at the original input
//! even after passes have erased or inserted text.

/// Returns the 1-based line number at byte `pos`, honoring `#line`.
pub fn line_number(src: &str, pos: usize) -> usize {
    const DIRECTIVE: &str = "#line ";
    let prefix = &src[..pos.min(src.len())];
    if let Some(found) = prefix.rfind(DIRECTIVE) {
        let after = &prefix[found + DIRECTIVE.len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        let base = digits.parse::<usize>().unwrap_or(1);
        base.saturating_sub(1) + after.matches('\n').count()
    } else {
        1 + prefix.matches('\n').count()
    }
}

/// Returns the 0-based column offset of byte `pos` into its line.
pub fn char_number(src: &str, pos: usize) -> usize {
    let prefix = &src[..pos.min(src.len())];
    match prefix.rfind('\n') {
        Some(newline) => prefix.len() - newline - 1,
        None => prefix.len(),
    }
}

/// Returns the full text of the line containing byte `pos`, without its
/// terminating newline.
pub fn line_str(src: &str, pos: usize) -> String {
    let pos = pos.min(src.len());
    let start = src[..pos].rfind('\n').map_or(0, |p| p + 1);
    let end = src[pos..].find('\n').map_or(src.len(), |p| pos + p);
    src[start..end].to_string()
}
