//! Upload gatekeeping: extension allow-list and filename sanitising.

use std::sync::OnceLock;

/// Extensions accepted for upload (compared lowercased).
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Why an upload was turned away. The display text is shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadRejection {
    NoFilePart,
    NoFileSelected,
    InvalidFileType,
    InvalidFileName,
}

impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NoFilePart => "No file uploaded",
            Self::NoFileSelected => "No file selected",
            Self::InvalidFileType => "Invalid file type",
            Self::InvalidFileName => "Invalid file name",
        };
        f.write_str(msg)
    }
}

/// True when `filename` has an extension in the allow-list.
///
/// This is a gate only; the name still has to go through [`secure_filename`]
/// before it touches the filesystem.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Reduce a client-supplied filename to a single safe path segment.
///
/// Non-ASCII characters are dropped, path separators and whitespace become
/// `_`, anything outside `[A-Za-z0-9_.-]` is removed and leading/trailing
/// `.`/`_` are stripped. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    static STRIP_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = STRIP_RE.get_or_init(|| regex::Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

    let ascii: String = filename
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let stripped = re.replace_all(&joined, "");
    stripped.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Validate then sanitise an uploaded filename.
pub fn accept_filename(filename: &str) -> Result<String, UploadRejection> {
    if filename.is_empty() {
        return Err(UploadRejection::NoFileSelected);
    }
    if !allowed_file(filename) {
        return Err(UploadRejection::InvalidFileType);
    }
    let safe = secure_filename(filename);
    if safe.is_empty() || !allowed_file(&safe) {
        return Err(UploadRejection::InvalidFileName);
    }
    Ok(safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_extensions_case_insensitively() {
        for name in ["a.png", "a.JPG", "photo.jpeg", "x.y.Gif"] {
            assert!(allowed_file(name), "{name} should be allowed");
        }
    }

    #[test]
    fn rejects_missing_or_foreign_extensions() {
        for name in ["", "png", "photo", "photo.bmp", "photo.png.exe", "photo.", ".png.txt"] {
            assert!(!allowed_file(name), "{name} should be rejected");
        }
    }

    #[test]
    fn dotfile_with_allowed_extension_passes_the_gate() {
        // Only the text after the last dot matters.
        assert!(allowed_file(".png"));
    }

    #[test]
    fn sanitizer_strips_directories() {
        assert_eq!(secure_filename("../../etc/passwd.png"), "etc_passwd.png");
        assert_eq!(secure_filename(r"C:\Users\me\site.jpg"), "C_Users_me_site.jpg");
    }

    #[test]
    fn sanitizer_collapses_whitespace_and_drops_unsafe_chars() {
        assert_eq!(secure_filename("my site  photo (1).png"), "my_site_photo_1.png");
        assert_eq!(secure_filename("caf\u{e9}.jpg"), "caf.jpg");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn accept_filename_reports_rejections() {
        assert_eq!(accept_filename(""), Err(UploadRejection::NoFileSelected));
        assert_eq!(accept_filename("notes.txt"), Err(UploadRejection::InvalidFileType));
        assert_eq!(accept_filename("\u{4e2d}.png"), Err(UploadRejection::InvalidFileName));
        assert_eq!(accept_filename("site 1.PNG"), Ok("site_1.PNG".to_string()));
    }
}
