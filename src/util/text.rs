use std::borrow::Cow;

/// Placeholder source label when neither the feed nor the URL names one.
pub const UNSORTED_SOURCE: &str = "未分区";

/// Characters that show up when UTF-8 was decoded as Latin-1 / Windows-1252.
const MOJIBAKE_MARKERS: &[char] = &['Ã', 'â', 'å', 'è', 'æ', 'ï', 'ð', 'ç', 'é'];

/// Returns the first value that is non-empty after trimming, trimmed.
pub fn first_non_empty<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    values
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Best-effort repair of text that was UTF-8 but got decoded through a
/// legacy single-byte code page somewhere upstream.
///
/// Only attempted when the text contains one of the usual marker characters
/// (`Ã`, `â`, `å`, ... or a C1 control). The text is re-encoded as Latin-1,
/// then as Windows-1252, and the first encoding whose bytes decode as valid
/// UTF-8 to something different wins. Anything else is returned trimmed and
/// unchanged.
///
/// # Examples
///
/// ```
/// use feedroll::util::repair_mojibake;
///
/// assert_eq!(repair_mojibake("cafÃ©"), "café");
/// assert_eq!(repair_mojibake("  plain  "), "plain");
/// ```
pub fn repair_mojibake(text: &str) -> String {
    let s = text.trim();
    if s.is_empty() || !looks_garbled(s) {
        return s.to_string();
    }

    let candidates = [encode_latin1(s), encode_windows_1252(s)];
    for bytes in candidates.into_iter().flatten() {
        if let Ok(fixed) = String::from_utf8(bytes) {
            if !fixed.is_empty() && fixed != s {
                return fixed;
            }
        }
    }
    s.to_string()
}

fn looks_garbled(s: &str) -> bool {
    s.chars()
        .any(|c| MOJIBAKE_MARKERS.contains(&c) || ('\u{80}'..='\u{9f}').contains(&c))
}

fn encode_latin1(s: &str) -> Option<Vec<u8>> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

fn encode_windows_1252(s: &str) -> Option<Vec<u8>> {
    let (bytes, _, had_unmappable) = encoding_rs::WINDOWS_1252.encode(s);
    if had_unmappable {
        None
    } else {
        Some(bytes.into_owned())
    }
}

/// Removes C0 control characters (except tab, newline, carriage return) and
/// DEL from feed-provided text.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));
    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_non_empty() {
        assert_eq!(first_non_empty([None, Some("  "), Some(" b "), Some("c")]), "b");
        assert_eq!(first_non_empty([None, Some("")]), "");
    }

    #[test]
    fn test_repair_latin1_mojibake() {
        assert_eq!(repair_mojibake("cafÃ©"), "café");
        // "中文" read as Latin-1
        assert_eq!(repair_mojibake("ä¸\u{AD}æ\u{96}\u{87}"), "中文");
    }

    #[test]
    fn test_repair_windows_1252_mojibake() {
        // U+2019 encoded as UTF-8 then decoded as Windows-1252
        assert_eq!(repair_mojibake("itâ€™s"), "it’s");
    }

    #[test]
    fn test_clean_text_untouched() {
        assert_eq!(repair_mojibake("Plain ASCII title"), "Plain ASCII title");
        assert_eq!(repair_mojibake("纯中文标题"), "纯中文标题");
        assert_eq!(repair_mojibake(""), "");
    }

    #[test]
    fn test_legitimate_accent_kept_when_not_reversible() {
        // "é" alone re-encodes to 0xE9, which is not valid UTF-8.
        assert_eq!(repair_mojibake("résumé"), "résumé");
    }

    #[test]
    fn test_strip_control_chars() {
        assert!(matches!(strip_control_chars("clean\ttext\n"), Cow::Borrowed(_)));
        assert_eq!(strip_control_chars("he\x00ll\x07o\x7f"), "hello");
    }
}
