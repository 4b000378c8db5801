//! Mail-relay drop files.
//!
//! Nothing is sent from here. A JSON file is dropped into a directory that an
//! external relay watches; the relay turns it into a mail.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::NotificationConfig;
use crate::error::{EngineError, EngineResult};
use crate::fs_ops;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailContent {
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Body")]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub mail_content: MailContent,
}

impl Notification {
    /// Mail for one finished source. `#` in the subject becomes the source
    /// name; the manifest text is appended to the body.
    pub fn for_source(
        config: &NotificationConfig,
        to: &str,
        source_name: &str,
        manifest: &str,
    ) -> Self {
        Notification {
            mail_content: MailContent {
                to: to.to_string(),
                subject: config.subject.replace('#', source_name),
                body: format!("{}{}", config.body, manifest),
            },
        }
    }

    /// Write `<timestamp>_<user>_<source>.json` into `drop_dir`.
    ///
    /// An existing drop file is never replaced: a taken name gets a `-1`,
    /// `-2`, ... suffix before the extension.
    pub fn drop_into(
        &self,
        drop_dir: &Path,
        timestamp: &str,
        user: &str,
        source_name: &str,
    ) -> EngineResult<PathBuf> {
        fs_ops::ensure_dir(drop_dir)?;
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::config(format!("cannot serialize notification: {}", e)))?;
        let stem = format!("{}_{}_{}", timestamp, user, source_name);
        let mut attempt = 0u32;
        loop {
            let path = if attempt == 0 {
                drop_dir.join(format!("{}.json", stem))
            } else {
                drop_dir.join(format!("{}-{}.json", stem, attempt))
            };
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(text.as_bytes())
                        .map_err(|e| EngineError::io("write notification", &path, e))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(EngineError::io("create notification", &path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(drop_path: &Path) -> NotificationConfig {
        NotificationConfig {
            drop_path: drop_path.to_path_buf(),
            domain: "example.org".to_string(),
            subject: "Upload # finished".to_string(),
            body: "Files:\n".to_string(),
        }
    }

    #[test]
    fn test_subject_and_body_are_filled_in() {
        let config = config(Path::new("/unused"));
        let mail = Notification::for_source(
            &config,
            "jdoe@example.org",
            "123456-2024-S00001",
            "Path\tHash\tStatus\n",
        );
        assert_eq!(mail.mail_content.subject, "Upload 123456-2024-S00001 finished");
        assert_eq!(mail.mail_content.body, "Files:\nPath\tHash\tStatus\n");
    }

    #[test]
    fn test_drop_file_has_relay_layout() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let drop_dir = temp_dir.path().join("mail");
        let config = config(&drop_dir);
        let mail = Notification::for_source(&config, "jdoe@example.org", "case", "rows");

        let path = mail
            .drop_into(&drop_dir, "240101-120000", "jdoe", "case")
            .expect("Failed to drop notification");
        assert_eq!(path, drop_dir.join("240101-120000_jdoe_case.json"));

        let text = fs::read_to_string(&path).expect("Failed to read drop file");
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(value["mail_content"]["To"], "jdoe@example.org");
        assert_eq!(value["mail_content"]["Subject"], "Upload case finished");
        assert_eq!(value["mail_content"]["Body"], "Files:\nrows");
    }

    #[test]
    fn test_taken_drop_name_gets_a_suffix() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let drop_dir = temp_dir.path().join("mail");
        let config = config(&drop_dir);
        let first = Notification::for_source(&config, "jdoe@example.org", "case", "first");
        let second = Notification::for_source(&config, "jdoe@example.org", "case", "second");

        let first_path = first
            .drop_into(&drop_dir, "240101-120000", "jdoe", "case")
            .expect("Failed to drop notification");
        let second_path = second
            .drop_into(&drop_dir, "240101-120000", "jdoe", "case")
            .expect("Failed to drop notification");
        assert_eq!(second_path, drop_dir.join("240101-120000_jdoe_case-1.json"));

        let body = |path: &Path| {
            let text = fs::read_to_string(path).expect("Failed to read drop file");
            let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
            value["mail_content"]["Body"].as_str().map(str::to_string)
        };
        assert_eq!(body(&first_path).as_deref(), Some("Files:\nfirst"));
        assert_eq!(body(&second_path).as_deref(), Some("Files:\nsecond"));
    }
}
