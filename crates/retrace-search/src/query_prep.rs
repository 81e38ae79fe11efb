//! Query text preparation (spec.md §4.6).
//!
//! Raw user input is split on whitespace; each token has the FTS5-reserved
//! glyphs (`"`, `*`, `:`) stripped, is requoted, and gets a trailing `*` so
//! FTS5 treats it as a prefix match (`"token"*`). Tokens are joined by
//! whitespace, which FTS5 treats as an implicit `AND`. A caller that wants
//! `OR`/`NOT` semantics passes the bare operator token; it's preserved
//! verbatim instead of being quoted, since quoting `"OR"` would make FTS5
//! search for the literal word rather than treat it as an operator.

const RESERVED: [char; 3] = ['"', '*', ':'];

/// Build the FTS5 `MATCH` expression for one user-entered query string.
///
/// Returns an empty string when every token is stripped down to nothing
/// (e.g. the input was only reserved glyphs) — callers must treat that as
/// "no text filter" rather than issuing an empty `MATCH ''`, which SQLite
/// rejects.
pub fn prepare_match_query(text: &str) -> String {
    text.split_whitespace()
        .filter_map(|token| {
            let upper = token.to_uppercase();
            if matches!(upper.as_str(), "AND" | "OR" | "NOT") {
                return Some(upper);
            }

            let stripped: String = token.chars().filter(|c| !RESERVED.contains(c)).collect();
            if stripped.is_empty() {
                None
            } else {
                Some(format!("\"{stripped}\"*"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip `<mark>`/`</mark>` tags emitted by FTS5's `snippet()` so the
/// caller-facing result carries plain text (spec.md §4.6 output contract).
pub fn strip_marks(snippet: &str) -> String {
    snippet.replace("<mark>", "").replace("</mark>", "")
}
