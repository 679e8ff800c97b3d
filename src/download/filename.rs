//! Filename and title sanitization, and download destination layout.
//!
//! Every filename and album title crosses through here before touching the
//! file system: illegal characters removed, lengths bounded, extensions
//! validated. Missing extensions are a hard error (`NoExtension`) because the
//! extension drives both the content-type guard and media classification.

use std::path::{Component, Path, PathBuf};

use crate::scrape::{ScrapeError, ScrapeJob};

/// Maximum filename stem length in characters.
pub const MAX_FILENAME_LEN: usize = 95;

/// Maximum folder title length in characters.
pub const MAX_TITLE_LEN: usize = 60;

/// Maximum extension length (without the dot).
const MAX_EXT_LEN: usize = 5;

/// Known image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".gifv", ".webp", ".jpe", ".svg", ".jfif", ".tif", ".tiff",
    ".jif",
];

/// Known video extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mpeg", ".avchd", ".webm", ".mpv", ".swf", ".avi", ".m4p", ".wmv", ".mp2", ".m4v", ".qt",
    ".mpe", ".mp4", ".flv", ".mov", ".mpg", ".ogg", ".mkv", ".mts", ".ts", ".f4v",
];

/// Known audio extensions.
pub const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".flac", ".wav", ".m4a"];

/// Extensions for which an html/text response body is legitimate.
pub const TEXT_EXTENSIONS: &[&str] = &[".htm", ".html", ".md", ".nfo", ".txt"];

/// Returns true for image/video/audio extensions.
#[must_use]
pub fn is_media_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
        || VIDEO_EXTENSIONS.contains(&ext.as_str())
        || AUDIO_EXTENSIONS.contains(&ext.as_str())
}

/// Returns true for extensions where a text body is expected.
#[must_use]
pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Splits a raw filename into a sanitized, length-bounded filename and its
/// lowercase extension.
///
/// # Errors
///
/// Returns [`ScrapeError::NoExtension`] when the name is empty, has no dot,
/// the extension is longer than five characters, or sanitization leaves no
/// stem.
pub fn filename_and_ext(raw: &str) -> Result<(String, String), ScrapeError> {
    if raw.is_empty() {
        return Err(ScrapeError::no_extension(raw));
    }

    let Some(dot) = raw.rfind('.') else {
        return Err(ScrapeError::no_extension(raw));
    };

    let ext_part = &raw[dot + 1..];
    if ext_part.is_empty() || ext_part.len() > MAX_EXT_LEN {
        return Err(ScrapeError::no_extension(raw));
    }

    let ext = format!(".{}", ext_part.to_lowercase());

    let stem: String = raw[..dot].chars().take(MAX_FILENAME_LEN).collect();
    let stem = stem.trim().trim_end_matches('.');
    let filename = sanitize_filename(&format!("{stem}{ext}"));

    // Sanitization can eat the whole stem (e.g. "???.jpg"); a bare extension
    // is not a usable filename.
    if filename == ext || filename.is_empty() {
        return Err(ScrapeError::no_extension(raw));
    }

    Ok((filename, ext))
}

/// Removes characters that are illegal on common filesystems.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\''))
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitizes an album/folder title and bounds it to [`MAX_TITLE_LEN`] chars.
///
/// When the title carries a trailing parenthesized qualifier (typically the
/// album ID or domain), the qualifier is preserved and only the leading part
/// is truncated.
#[must_use]
pub fn sanitize_title(raw: &str) -> String {
    let mut title = raw.replace(['\n', '\t'], " ");
    title = collapse_spaces(&title);
    title = title
        .chars()
        .map(|c| match c {
            '\\' | '*' | '?' | ':' | '"' | '<' | '>' | '|' | '/' => '-',
            c => c,
        })
        .collect();
    title = collapse_dots(&title);
    let title = title.trim_end_matches('.').trim();

    if let (Some(open), true) = (title.rfind('('), title.ends_with(')')) {
        let head: String = title[..open].trim().chars().take(MAX_TITLE_LEN).collect();
        let tail = title[open..].trim();
        let head = head.trim();
        if head.is_empty() {
            return tail.to_string();
        }
        return format!("{head} {tail}");
    }

    title.chars().take(MAX_TITLE_LEN).collect::<String>().trim().to_string()
}

fn collapse_spaces(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_space = false;
    for ch in value.chars() {
        if ch == ' ' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

fn collapse_dots(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_dot = false;
    for ch in value.chars() {
        if ch == '.' {
            if !prev_dot {
                out.push('.');
            }
            prev_dot = true;
        } else {
            out.push(ch);
            prev_dot = false;
        }
    }
    out
}

/// Computes the destination directory for media found by `job`.
///
/// Retry jobs use their fixed override. Album members land under the album
/// title; otherwise files go into a per-site `Loose Files` folder
/// (optionally under the inherited title).
#[must_use]
pub fn download_path(
    download_dir: &Path,
    job: &ScrapeJob,
    site: &str,
    block_sub_folders: bool,
) -> PathBuf {
    if job.retry
        && let Some(path) = &job.retry_path
    {
        return path.clone();
    }

    let path = match (&job.parent_title, job.part_of_album) {
        (Some(title), true) => download_dir.join(title),
        (Some(title), false) => download_dir
            .join(title)
            .join(format!("Loose Files ({site})")),
        (None, _) => download_dir.join(format!("Loose Files ({site})")),
    };

    if block_sub_folders {
        collapse_to_first_level(download_dir, &path)
    } else {
        path
    }
}

/// Reduces `path` to its first component below `base`.
fn collapse_to_first_level(base: &Path, path: &Path) -> PathBuf {
    let Ok(relative) = path.strip_prefix(base) else {
        return path.to_path_buf();
    };
    match relative.components().next() {
        Some(Component::Normal(first)) => base.join(first),
        _ => path.to_path_buf(),
    }
}

/// Parses a Content-Disposition header to extract the served filename.
///
/// Handles:
/// - `attachment; filename="example.mp4"`
/// - `attachment; filename=example.mp4`
/// - `attachment; filename*=UTF-8''example.mp4` (RFC 5987)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim();
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;

    fn job(url: &str) -> ScrapeJob {
        ScrapeJob::new(Url::parse(url).unwrap())
    }

    // --- filename_and_ext ---

    #[test]
    fn test_filename_and_ext_basic() {
        let (name, ext) = filename_and_ext("video.MP4").unwrap();
        assert_eq!(name, "video.mp4");
        assert_eq!(ext, ".mp4");
    }

    #[test]
    fn test_filename_and_ext_rejects_missing_extension() {
        assert!(matches!(
            filename_and_ext("video"),
            Err(ScrapeError::NoExtension { .. })
        ));
        assert!(matches!(
            filename_and_ext(""),
            Err(ScrapeError::NoExtension { .. })
        ));
    }

    #[test]
    fn test_filename_and_ext_rejects_long_extension() {
        assert!(matches!(
            filename_and_ext("archive.toolong"),
            Err(ScrapeError::NoExtension { .. })
        ));
    }

    #[test]
    fn test_filename_and_ext_truncates_long_stems() {
        let raw = format!("{}{}", "a".repeat(200), ".jpg");
        let (name, _) = filename_and_ext(&raw).unwrap();
        assert_eq!(name.chars().count(), MAX_FILENAME_LEN + 4);
    }

    #[test]
    fn test_filename_and_ext_sanitizes_illegal_chars() {
        let (name, _) = filename_and_ext("my<file>:v2?.mp4").unwrap();
        assert_eq!(name, "myfilev2.mp4");
    }

    #[test]
    fn test_filename_and_ext_rejects_fully_sanitized_stem() {
        assert!(matches!(
            filename_and_ext("???.jpg"),
            Err(ScrapeError::NoExtension { .. })
        ));
    }

    // --- sanitize_filename ---

    #[test]
    fn test_sanitize_filename_removes_illegal_chars() {
        assert_eq!(sanitize_filename(r#"a/b\c:d*e?f"g<h>i|j'k.jpg"#), "abcdefghijk.jpg");
    }

    #[test]
    fn test_sanitize_filename_keeps_unicode() {
        assert_eq!(sanitize_filename("日本語 photo.jpg"), "日本語 photo.jpg");
    }

    // --- sanitize_title ---

    #[test]
    fn test_sanitize_title_collapses_whitespace_and_replaces_illegal() {
        assert_eq!(sanitize_title("My  Album\t/ 2024"), "My Album - 2024");
    }

    #[test]
    fn test_sanitize_title_collapses_dot_runs_and_trailing_dots() {
        assert_eq!(sanitize_title("Album..... vol 2..."), "Album. vol 2");
    }

    #[test]
    fn test_sanitize_title_truncates_to_sixty() {
        let raw = "x".repeat(100);
        assert_eq!(sanitize_title(&raw).chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn test_sanitize_title_preserves_paren_qualifier() {
        let raw = format!("{} (stashbox)", "t".repeat(100));
        let title = sanitize_title(&raw);
        assert!(title.ends_with("(stashbox)"), "got: {title}");
        assert!(title.chars().count() <= MAX_TITLE_LEN + " (stashbox)".len());
    }

    // --- download_path ---

    #[test]
    fn test_download_path_loose_files_without_title() {
        let path = download_path(
            Path::new("/dl"),
            &job("https://example.com/f/1"),
            "stashbox",
            false,
        );
        assert_eq!(path, Path::new("/dl/Loose Files (stashbox)"));
    }

    #[test]
    fn test_download_path_album_member_uses_title() {
        let mut j = job("https://example.com/f/1").with_parent_title("Holiday");
        j.part_of_album = true;
        let path = download_path(Path::new("/dl"), &j, "stashbox", false);
        assert_eq!(path, Path::new("/dl/Holiday"));
    }

    #[test]
    fn test_download_path_titled_loose_file() {
        let j = job("https://example.com/f/1").with_parent_title("Holiday");
        let path = download_path(Path::new("/dl"), &j, "stashbox", false);
        assert_eq!(path, Path::new("/dl/Holiday/Loose Files (stashbox)"));
    }

    #[test]
    fn test_download_path_retry_override_wins() {
        let j = ScrapeJob::retry(
            Url::parse("https://example.com/f/1").unwrap(),
            PathBuf::from("/dl/retry-here"),
        );
        let path = download_path(Path::new("/dl"), &j, "stashbox", false);
        assert_eq!(path, Path::new("/dl/retry-here"));
    }

    #[test]
    fn test_download_path_block_sub_folders_collapses() {
        let j = job("https://example.com/f/1").with_parent_title("Holiday");
        let path = download_path(Path::new("/dl"), &j, "stashbox", true);
        assert_eq!(path, Path::new("/dl/Holiday"));
    }

    // --- content disposition ---

    #[test]
    fn test_parse_content_disposition_quoted() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="clip.mp4""#),
            Some("clip.mp4".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_unquoted_with_params() {
        assert_eq!(
            parse_content_disposition("attachment; filename=clip.mp4; size=99"),
            Some("clip.mp4".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_rfc5987() {
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''my%20clip.mp4"),
            Some("my clip.mp4".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_missing() {
        assert_eq!(parse_content_disposition("attachment"), None);
    }

    // --- extension sets ---

    #[test]
    fn test_media_extension_classification() {
        assert!(is_media_extension(".jpg"));
        assert!(is_media_extension(".MP4"));
        assert!(is_media_extension(".flac"));
        assert!(!is_media_extension(".html"));
        assert!(!is_media_extension(".exe"));
    }

    #[test]
    fn test_text_extension_classification() {
        assert!(is_text_extension(".txt"));
        assert!(is_text_extension(".HTML"));
        assert!(!is_text_extension(".jpg"));
    }
}
