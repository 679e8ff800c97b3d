//! URL canonicalization for dedup keys.
//!
//! Hosts decorate the same underlying file with query noise and generated ID
//! suffixes (`file-ab12.jpg` for `file.jpg`). Canonicalization collapses
//! those variants to one key so the completion store holds at most one record
//! per resource. The suffix heuristic is deliberately conservative: the tail
//! must be 4-12 alphanumerics containing at least one digit, and stripping
//! must leave a non-empty stem, so names like `my-file.jpg` survive intact.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

#[allow(clippy::expect_used)]
static GENERATED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-([A-Za-z0-9]{4,12})$").expect("generated-ID pattern is valid")
});

/// Normalizes a URL into a dedup key.
///
/// Drops the query string and fragment, keeps scheme/host/path. When
/// `strip_generated_id` is set, one trailing generated-ID group is removed
/// from the final path segment's stem.
#[must_use]
pub fn canonicalize(url: &Url, strip_generated_id: bool) -> String {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);

    if strip_generated_id
        && let Some(last) = last_path_segment(&canonical)
    {
        let stripped = strip_id_suffix(&last);
        if stripped != last {
            let path = canonical.path();
            let parent_len = path.len() - last.len();
            let new_path = format!("{}{stripped}", &path[..parent_len]);
            canonical.set_path(&new_path);
        }
    }

    canonical.to_string()
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|segment| !segment.is_empty())
}

/// Removes one trailing `-<id>` group from a filename's stem.
///
/// Returns the input unchanged when the tail does not look generated.
#[must_use]
pub fn strip_id_suffix(segment: &str) -> String {
    let (stem, ext) = match segment.rfind('.') {
        Some(pos) if pos > 0 => (&segment[..pos], &segment[pos..]),
        _ => (segment, ""),
    };

    if let Some(caps) = GENERATED_ID.captures(stem) {
        let id = &caps[1];
        let new_stem = &stem[..stem.len() - caps[0].len()];
        if !new_stem.is_empty() && id.chars().any(|c| c.is_ascii_digit()) {
            return format!("{new_stem}{ext}");
        }
    }

    segment.to_string()
}
