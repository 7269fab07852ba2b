//! Attachment reference scanner.
//!
//! Finds Markdown links and image embeds whose target lives under the
//! `/uploads/` root:
//!
//! ```text
//! ![diagram](/uploads/a1b2/diagram.png)
//! [notes.pdf](/uploads/ff00/notes.pdf)
//! ```
//!
//! Links to anything else (absolute URLs, other relative paths) are ignored.
//! The same pattern drives the rewriter's second pass, so offsets produced
//! here line up with the matches the rewriter sees.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::models::AttachmentReference;

/// Path prefix identifying a migratable attachment.
pub const UPLOAD_ROOT: &str = "/uploads/";

pub(crate) static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(!?)\[([^\]]+)\]\((/uploads/[^)]+)\)").expect("reference pattern is valid")
});

/// Scan `body` for attachment references, left to right.
///
/// The iterator borrows `body` and has no side effects; call again to
/// restart.
pub fn scan_references(body: &str) -> impl Iterator<Item = AttachmentReference> + '_ {
    REFERENCE_PATTERN
        .captures_iter(body)
        .map(|caps| reference_from_captures(&caps))
}

fn reference_from_captures(caps: &Captures<'_>) -> AttachmentReference {
    let whole = caps.get(0).expect("group 0 is always present");
    AttachmentReference {
        offset: whole.start(),
        is_embed: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
        label: caps[2].to_string(),
        source_path: caps[3].to_string(),
    }
}

/// Check that a source path stays inside the upload root and names a file.
///
/// Rejects empty basenames (`/uploads/abc/`) and any `.`, `..` or empty
/// segment below the root.
pub fn is_well_formed(source_path: &str) -> bool {
    let Some(rest) = source_path.strip_prefix(UPLOAD_ROOT) else {
        return false;
    };
    if rest.is_empty() || rest.ends_with('/') {
        return false;
    }
    rest.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
