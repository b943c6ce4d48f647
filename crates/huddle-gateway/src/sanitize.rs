//! Escaping applied to untrusted text before it is stored or echoed.

/// Escape `<`, `>` and `"` to entities, then trim. Used for room names and
/// other short labels.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Message bodies additionally escape `'`.
pub fn escape_message(s: &str) -> String {
    escape_text(s).replace('\'', "&#39;")
}

/// Profile fields such as avatar URLs drop markup characters outright.
/// Blank input yields `None`.
pub fn strip_markup(s: &str) -> Option<String> {
    let stripped: String = s.chars().filter(|c| !matches!(c, '<' | '>' | '"')).collect();
    let stripped = stripped.trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}

/// Length as users perceive it: characters, not bytes.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}
