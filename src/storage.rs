use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::config::StorageSettings;

/// Subfolder of the output directory every detection run writes into.
///
/// Reused across runs: concurrent uploads can overwrite each other's
/// annotated image before it is located.
pub const RUN_NAME: &str = "exp";

/// Filesystem layout for uploads, detection output and the contact log.
#[derive(Clone, Debug)]
pub struct StoragePaths {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub contact_log: PathBuf,
    pub run_name: String,
}

/// One contact-form submission. Fields are logged verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl StoragePaths {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        contact_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            contact_log: contact_log.into(),
            run_name: RUN_NAME.to_string(),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            &settings.upload_dir,
            &settings.output_dir,
            &settings.contact_log,
        )
    }

    /// Create the upload and output directories if absent.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Write an upload under its (already sanitised) name, replacing any
    /// previous file with that name.
    pub fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        if !is_single_segment(filename) {
            return Err(anyhow!("upload name '{}' is not a plain file name", filename));
        }
        let path = self.upload_dir.join(filename);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to save upload {}", path.display()))?;
        Ok(path)
    }

    /// Resolve a served upload. Only a single path segment is accepted.
    pub fn resolve_upload(&self, name: &str) -> Option<PathBuf> {
        if !is_single_segment(name) {
            return None;
        }
        resolve_within(&self.upload_dir, name)
    }

    /// Resolve a served detection artifact by path relative to the output root.
    pub fn resolve_output(&self, rel: &str) -> Option<PathBuf> {
        resolve_within(&self.output_dir, rel)
    }

    /// Append one `timestamp | name | email | message` line to the contact log.
    pub fn append_contact(&self, timestamp: &str, msg: &ContactMessage) -> Result<()> {
        if let Some(parent) = self.contact_log.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.contact_log)
            .with_context(|| format!("failed to open {}", self.contact_log.display()))?;
        writeln!(
            file,
            "{} | {} | {} | {}",
            timestamp,
            one_line(&msg.name),
            one_line(&msg.email),
            one_line(&msg.message)
        )?;
        Ok(())
    }
}

fn one_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn is_single_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}

/// Join `rel` onto `root`, refusing anything that could leave the root.
fn resolve_within(root: &Path, rel: &str) -> Option<PathBuf> {
    if rel.is_empty() || rel.contains('\\') || rel.contains('\0') {
        return None;
    }
    let rel_path = Path::new(rel);
    if !rel_path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    let candidate = root.join(rel_path);
    if !candidate.is_file() {
        return None;
    }
    // Symlinks inside the root must not point outside it.
    let canonical_root = root.canonicalize().ok()?;
    let canonical = candidate.canonicalize().ok()?;
    if canonical.starts_with(&canonical_root) {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &Path) -> StoragePaths {
        StoragePaths::new(
            dir.join("uploads"),
            dir.join("yolo_output"),
            dir.join("contact_messages.txt"),
        )
    }

    #[test]
    fn ensure_creates_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = paths(dir.path());
        storage.ensure().unwrap();
        assert!(storage.upload_dir.is_dir());
        assert!(storage.output_dir.is_dir());
        // idempotent
        storage.ensure().unwrap();
    }

    #[test]
    fn save_upload_refuses_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = paths(dir.path());
        storage.ensure().unwrap();
        assert!(storage.save_upload("../escape.png", b"x").is_err());
        assert!(storage.save_upload("a/b.png", b"x").is_err());
        let saved = storage.save_upload("site.png", b"x").unwrap();
        assert_eq!(saved, storage.upload_dir.join("site.png"));
    }

    #[test]
    fn resolve_blocks_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = paths(dir.path());
        storage.ensure().unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"s").unwrap();
        std::fs::create_dir_all(storage.output_dir.join("exp")).unwrap();
        std::fs::write(storage.output_dir.join("exp").join("a.jpg"), b"a").unwrap();

        assert!(storage.resolve_upload("../secret.txt").is_none());
        assert!(storage.resolve_output("../secret.txt").is_none());
        assert!(storage.resolve_output("exp/../../secret.txt").is_none());
        assert!(storage.resolve_output("/etc/passwd").is_none());
        assert!(storage.resolve_output("exp").is_none());
        assert_eq!(
            storage.resolve_output("exp/a.jpg"),
            Some(storage.output_dir.join("exp").join("a.jpg"))
        );
    }

    #[test]
    fn uploads_route_accepts_only_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let storage = paths(dir.path());
        storage.ensure().unwrap();
        std::fs::create_dir_all(storage.upload_dir.join("nested")).unwrap();
        std::fs::write(storage.upload_dir.join("nested").join("a.png"), b"a").unwrap();
        assert!(storage.resolve_upload("nested/a.png").is_none());
    }

    #[test]
    fn contact_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let storage = paths(dir.path());
        let msg = ContactMessage {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            message: "hello\nthere".into(),
        };
        storage.append_contact("2024-05-01 10:00:00", &msg).unwrap();
        storage.append_contact("2024-05-01 10:05:00", &msg).unwrap();
        let log = std::fs::read_to_string(&storage.contact_log).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "2024-05-01 10:00:00 | Ana | ana@example.com | hello there"
        );
    }
}
