//! TSV manifest of one copied source.

use std::path::{Path, PathBuf};

use crate::config::ManifestLabels;
use crate::error::EngineResult;
use crate::fs_ops;
use crate::hasher::HashResults;
use crate::model::{FileRecord, VerificationStatus};
use crate::verify::VerificationReport;

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub relative_path: String,
    pub digest: String,
    pub status: VerificationStatus,
}

/// Header plus one row per enumerated file, in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    labels: ManifestLabels,
    rows: Vec<ManifestRow>,
}

/// Where `persist` put the two copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedManifest {
    pub audit_path: PathBuf,
    pub destination_path: PathBuf,
}

impl Manifest {
    /// Join records with their digests and statuses by relative path.
    ///
    /// Row order is taken from `records`; the order of `hashes` and `report`
    /// does not matter. A file the verifier never saw counts as missing.
    pub fn build(
        records: &[FileRecord],
        hashes: &HashResults,
        report: &VerificationReport,
        labels: &ManifestLabels,
    ) -> Self {
        let rows = records
            .iter()
            .map(|record| ManifestRow {
                relative_path: record.relative_path.clone(),
                digest: hashes
                    .get(&record.relative_path)
                    .map(|digest| digest.hex().to_string())
                    .unwrap_or_default(),
                status: report
                    .status(&record.relative_path)
                    .unwrap_or(VerificationStatus::Missing),
            })
            .collect();
        Manifest {
            labels: labels.clone(),
            rows,
        }
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn label(&self, status: VerificationStatus) -> &str {
        match status {
            VerificationStatus::Ok => &self.labels.ok,
            VerificationStatus::Missing => &self.labels.missing,
            VerificationStatus::SizeMismatch => &self.labels.size_mismatch,
        }
    }

    /// The exact bytes written by `persist`.
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(64 * (self.rows.len() + 1));
        text.push_str(&self.labels.header);
        text.push('\n');
        for row in &self.rows {
            text.push_str(&row.relative_path);
            text.push('\t');
            text.push_str(&row.digest);
            text.push('\t');
            text.push_str(self.label(row.status));
            text.push('\n');
        }
        text
    }

    /// Write the manifest as `<timestamp>-<file_name>` into both directories.
    pub fn persist(
        &self,
        audit_dir: &Path,
        destination_dir: &Path,
        timestamp: &str,
        file_name: &str,
    ) -> EngineResult<PersistedManifest> {
        let name = format!("{}-{}", timestamp, file_name);
        let text = self.to_text();
        let audit_path = audit_dir.join(&name);
        let destination_path = destination_dir.join(&name);
        fs_ops::write_text(&audit_path, &text, "write manifest")?;
        fs_ops::write_text(&destination_path, &text, "write manifest")?;
        Ok(PersistedManifest {
            audit_path,
            destination_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{compute_checksum, ChecksumAlgorithm};
    use crate::fs_ops::enumerate_tree;
    use crate::progress::{CancelToken, SilentProgress};
    use crate::verify::IntegrityVerifier;
    use std::fs;

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord {
            source_path: PathBuf::from("/src").join(path),
            relative_path: path.to_string(),
            size,
        }
    }

    fn digest(content: &[u8]) -> crate::checksums::ChecksumValue {
        compute_checksum(content, ChecksumAlgorithm::Md5)
    }

    #[test]
    fn test_row_order_follows_enumeration_not_hash_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("b")).expect("Failed to create dirs");
        fs::write(src.join("a.txt"), b"a").expect("Failed to write");
        fs::write(src.join("b").join("c.txt"), b"c").expect("Failed to write");
        fs::write(src.join("d.txt"), b"d").expect("Failed to write");
        let records = enumerate_tree(&src).expect("Failed to enumerate").files;

        // Hashes arrive in reverse completion order
        let reversed = HashResults::from_pairs(
            records
                .iter()
                .rev()
                .map(|r| (r.relative_path.clone(), digest(r.relative_path.as_bytes())))
                .collect(),
        );
        let report = IntegrityVerifier::new(&src, CancelToken::new())
            .verify(&records, &SilentProgress)
            .expect("verification should run");

        let manifest = Manifest::build(&records, &reversed, &report, &ManifestLabels::default());
        let order: Vec<_> = manifest.rows().iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(order, vec!["a.txt", "b/c.txt", "d.txt"]);
        assert_eq!(manifest.rows()[1].digest, digest(b"b/c.txt").hex());
    }

    #[test]
    fn test_text_layout_uses_configured_labels() {
        let records = vec![record("x.bin", 10), record("y.bin", 0), record("z.bin", 500)];
        let hashes = HashResults::from_pairs(vec![
            ("x.bin".to_string(), digest(b"x")),
            ("y.bin".to_string(), digest(b"")),
            ("z.bin".to_string(), digest(b"z")),
        ]);
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path();
        fs::write(dst.join("x.bin"), [0u8; 10]).expect("Failed to write");
        fs::write(dst.join("z.bin"), [0u8; 7]).expect("Failed to write");
        let report = IntegrityVerifier::new(dst, CancelToken::new())
            .verify(&records, &SilentProgress)
            .expect("verification should run");
        let labels = ManifestLabels {
            header: "File\tMD5\tResult".to_string(),
            ok: "OK".to_string(),
            missing: "MISSING".to_string(),
            size_mismatch: "SIZE".to_string(),
        };

        let text = Manifest::build(&records, &hashes, &report, &labels).to_text();
        let expected = format!(
            "File\tMD5\tResult\nx.bin\t{}\tOK\ny.bin\td41d8cd98f00b204e9800998ecf8427e\tMISSING\nz.bin\t{}\tSIZE\n",
            digest(b"x").hex(),
            digest(b"z").hex()
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_persisted_copies_are_byte_identical() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let audit = temp_dir.path().join("audit");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&audit).expect("Failed to create audit dir");
        fs::create_dir_all(&dst).expect("Failed to create dst dir");
        fs::write(dst.join("x.bin"), [0u8; 10]).expect("Failed to write");

        let records = vec![record("x.bin", 10)];
        let hashes = HashResults::from_pairs(vec![("x.bin".to_string(), digest(b"x"))]);
        let report = IntegrityVerifier::new(&dst, CancelToken::new())
            .verify(&records, &SilentProgress)
            .expect("verification should run");
        let manifest = Manifest::build(&records, &hashes, &report, &ManifestLabels::default());

        let written = manifest
            .persist(&audit, &dst, "240101-120000", "manifest.tsv")
            .expect("Failed to persist manifest");
        assert_eq!(written.audit_path, audit.join("240101-120000-manifest.tsv"));
        assert_eq!(written.destination_path, dst.join("240101-120000-manifest.tsv"));
        let audit_bytes = fs::read(&written.audit_path).expect("Failed to read audit copy");
        let dst_bytes =
            fs::read(&written.destination_path).expect("Failed to read destination copy");
        assert_eq!(audit_bytes, dst_bytes);
        assert_eq!(audit_bytes, manifest.to_text().into_bytes());
    }

    #[test]
    fn test_persist_into_missing_directory_fails_with_io() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manifest = Manifest::build(
            &[],
            &HashResults::default(),
            &VerificationReport::default(),
            &ManifestLabels::default(),
        );
        let result = manifest.persist(
            &temp_dir.path().join("gone"),
            temp_dir.path(),
            "240101-120000",
            "manifest.tsv",
        );
        assert!(matches!(result, Err(crate::error::EngineError::Io { .. })));
    }
}
