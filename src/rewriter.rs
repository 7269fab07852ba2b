//! Single-pass link rewriter.
//!
//! Re-scans the original text with the scanner's pattern and swaps each
//! match for the replacement registered at its start offset. Matches with
//! no entry are copied through unchanged, as is everything between matches.

use crate::models::ReplacementMap;
use crate::scanner::REFERENCE_PATTERN;

/// Produce the rewritten body. `body` is not modified.
pub fn rewrite(body: &str, replacements: &ReplacementMap) -> String {
    if replacements.is_empty() {
        return body.to_string();
    }

    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for m in REFERENCE_PATTERN.find_iter(body) {
        out.push_str(&body[last..m.start()]);
        match replacements.get(&m.start()) {
            Some(replacement) => out.push_str(replacement),
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }
    out.push_str(&body[last..]);
    out
}
