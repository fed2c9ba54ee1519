//! Output locator: find the annotated image a detection run wrote.
//!
//! The detector is expected to save `<save_dir>/<input file name>`, but
//! non-JPEG inputs may come back re-encoded as `<stem>.jpg`. Both candidates
//! are tried, in that order. This is a compatibility shim for the detector's
//! save behaviour, not a contract it documents.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// An annotated image found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedOutput {
    pub path: PathBuf,
    /// Path relative to the output root, `/`-separated, for URL building.
    pub relative: String,
}

/// The candidate paths, in the order they are tried.
pub fn candidates(save_dir: &Path, input: &Path) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(2);
    if let Some(name) = input.file_name() {
        out.push(save_dir.join(name));
    }
    if let Some(stem) = input.file_stem() {
        let mut jpg = OsString::from(stem);
        jpg.push(".jpg");
        let alt = save_dir.join(jpg);
        if !out.contains(&alt) {
            out.push(alt);
        }
    }
    out
}

/// Locate the annotated copy of `input` under `save_dir`.
///
/// Returns `None` when neither candidate exists or the file is not under
/// `output_root` (it could not be served).
pub fn locate_output(save_dir: &Path, input: &Path, output_root: &Path) -> Option<LocatedOutput> {
    let path = candidates(save_dir, input)
        .into_iter()
        .find(|candidate| candidate.is_file())?;
    let relative = relative_url_path(&path, output_root)?;
    Some(LocatedOutput { path, relative })
}

fn relative_url_path(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().replace('\\', "/")),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("yolo_output");
        let save_dir = root.join("exp");
        std::fs::create_dir_all(&save_dir).unwrap();
        (dir, root, save_dir)
    }

    #[test]
    fn exact_name_wins_when_both_exist() {
        let (_dir, root, save_dir) = setup();
        std::fs::write(save_dir.join("photo.png"), b"png").unwrap();
        std::fs::write(save_dir.join("photo.jpg"), b"jpg").unwrap();

        let found = locate_output(&save_dir, Path::new("uploads/photo.png"), &root).unwrap();
        assert_eq!(found.path, save_dir.join("photo.png"));
        assert_eq!(found.relative, "exp/photo.png");
    }

    #[test]
    fn falls_back_to_jpg() {
        let (_dir, root, save_dir) = setup();
        std::fs::write(save_dir.join("photo.jpg"), b"jpg").unwrap();

        let found = locate_output(&save_dir, Path::new("uploads/photo.png"), &root).unwrap();
        assert_eq!(found.path, save_dir.join("photo.jpg"));
        assert_eq!(found.relative, "exp/photo.jpg");
    }

    #[test]
    fn missing_output_is_not_found() {
        let (_dir, root, save_dir) = setup();
        assert!(locate_output(&save_dir, Path::new("uploads/photo.png"), &root).is_none());
    }

    #[test]
    fn jpg_input_has_a_single_candidate() {
        let save_dir = Path::new("out/exp");
        assert_eq!(
            candidates(save_dir, Path::new("sample.jpg")),
            vec![PathBuf::from("out/exp/sample.jpg")]
        );
    }

    #[test]
    fn only_the_last_extension_is_replaced() {
        let save_dir = Path::new("out/exp");
        assert_eq!(
            candidates(save_dir, Path::new("site.v2.gif")),
            vec![
                PathBuf::from("out/exp/site.v2.gif"),
                PathBuf::from("out/exp/site.v2.jpg")
            ]
        );
    }

    #[test]
    fn output_outside_root_is_not_servable() {
        let (dir, root, _save_dir) = setup();
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(elsewhere.join("photo.png"), b"png").unwrap();
        assert!(locate_output(&elsewhere, Path::new("photo.png"), &root).is_none());
    }
}
