//! Configuration and per-user run settings.
//!
//! `Config` is the site-wide configuration (destinations, audit log root,
//! naming rules, marker names). It is read once from JSON and rejected at
//! load time when keys are unknown, missing or malformed. `RunSettings` holds
//! the user's toggles and is persisted back after each run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::Glob;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::{EngineError, EngineResult};

fn default_log_name() -> String {
    "log.txt".to_string()
}

fn default_copy_tool() -> String {
    "robocopy".to_string()
}

fn default_anonymous_user() -> String {
    "unknown user".to_string()
}

/// Site configuration, loaded from `config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root under which all destinations live
    pub target_path: PathBuf,
    /// Destination key -> subdirectory of `target_path`
    pub destinations: BTreeMap<String, String>,
    pub default_destination: String,
    /// Shared audit-log root (remote logs, manifests, crash records)
    pub log_path: PathBuf,
    /// Process-lifetime log file
    pub process_log: PathBuf,
    #[serde(default = "default_log_name")]
    pub log_name: String,
    /// Pattern the final component of a source directory must match
    pub dir_regex: String,
    pub max_path_length: usize,
    /// Glob patterns of forbidden sub-paths
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Marker file names whose presence blocks processing
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Completion marker written after a run
    pub trigger_name: String,
    /// Quality-check marker written after a run
    pub qualicheck_name: String,
    /// Manifest file name (prefixed with the run timestamp)
    pub tsv_name: String,
    #[serde(default)]
    pub manifest: ManifestLabels,
    #[serde(default)]
    pub hash_algorithm: ChecksumAlgorithm,
    #[serde(default = "default_copy_tool")]
    pub copy_tool: String,
    pub notification: NotificationConfig,
    /// Operator label used in markers when no user name is set
    #[serde(default = "default_anonymous_user")]
    pub anonymous_user: String,
}

/// Fixed header and status tokens of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestLabels {
    pub header: String,
    pub ok: String,
    pub missing: String,
    pub size_mismatch: String,
}

impl Default for ManifestLabels {
    fn default() -> Self {
        ManifestLabels {
            header: "Path\tHash\tStatus".to_string(),
            ok: "ok".to_string(),
            missing: "missing".to_string(),
            size_mismatch: "size mismatch".to_string(),
        }
    }
}

/// Where and how the mail-relay drop file is written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    /// Directory watched by the mail relay
    pub drop_path: PathBuf,
    /// Mail domain appended to the user name
    pub domain: String,
    /// Subject template; `#` is replaced by the source name
    pub subject: String,
    /// Body prefix; the manifest is appended
    pub body: String,
}

impl Config {
    /// Load and validate the configuration file at `path`.
    ///
    /// `$APP/` in path values is resolved against the directory holding the
    /// file, `$HOME/` against the user's home directory.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io("read config", path, e))?;
        let app_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&text, &app_dir)
    }

    pub fn from_json(text: &str, app_dir: &Path) -> EngineResult<Self> {
        let mut config: Config = serde_json::from_str(text)
            .map_err(|e| EngineError::config(format!("invalid config: {}", e)))?;
        config.target_path = expand_path(&config.target_path, app_dir);
        config.log_path = expand_path(&config.log_path, app_dir);
        config.process_log = expand_path(&config.process_log, app_dir);
        config.notification.drop_path = expand_path(&config.notification.drop_path, app_dir);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> EngineResult<()> {
        Regex::new(&self.dir_regex)
            .map_err(|e| EngineError::config(format!("dir_regex {:?}: {}", self.dir_regex, e)))?;
        for pattern in &self.blacklist {
            Glob::new(pattern).map_err(|e| {
                EngineError::config(format!("blacklist pattern {:?}: {}", pattern, e))
            })?;
        }
        if !self.destinations.contains_key(&self.default_destination) {
            return Err(EngineError::config(format!(
                "default_destination {:?} is not a configured destination",
                self.default_destination
            )));
        }
        if self.max_path_length == 0 {
            return Err(EngineError::config("max_path_length must be positive"));
        }
        for (key, name) in [
            ("trigger_name", &self.trigger_name),
            ("qualicheck_name", &self.qualicheck_name),
            ("tsv_name", &self.tsv_name),
            ("log_name", &self.log_name),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(EngineError::config(format!("{} must be a plain file name", key)));
            }
        }
        Ok(())
    }

    /// Root directory for destination `key`.
    pub fn destination_root(&self, key: &str) -> EngineResult<PathBuf> {
        self.destinations
            .get(key)
            .map(|sub| self.target_path.join(sub))
            .ok_or_else(|| EngineError::config(format!("unknown destination {:?}", key)))
    }

    /// Marker names whose presence means a directory is owned by another run.
    ///
    /// The completion marker always blocks, even when not listed in `triggers`.
    pub fn blocking_markers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.triggers.iter().map(String::as_str).collect();
        if !names.contains(&self.trigger_name.as_str()) {
            names.push(&self.trigger_name);
        }
        names
    }
}

fn expand_path(path: &Path, app_dir: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("$HOME/").or_else(|| text.strip_prefix("$HOME\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    if let Some(rest) = text.strip_prefix("$APP/").or_else(|| text.strip_prefix("$APP\\")) {
        return app_dir.join(rest);
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// The user's toggles for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// User name, also the local part of the notification address
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default = "enabled")]
    pub write_trigger: bool,
    #[serde(default = "enabled")]
    pub send_notification: bool,
    #[serde(default)]
    pub write_qualicheck: bool,
    /// Continue with blacklisted sources instead of skipping them
    #[serde(default)]
    pub tolerant: bool,
}

fn enabled() -> bool {
    true
}

impl RunSettings {
    pub fn defaults(config: &Config) -> Self {
        RunSettings {
            user: String::new(),
            destination: config.default_destination.clone(),
            write_trigger: true,
            send_notification: true,
            write_qualicheck: false,
            tolerant: false,
        }
    }

    /// Load settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path, config: &Config) -> EngineResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::defaults(config)),
            Err(e) => return Err(EngineError::io("read settings", path, e)),
        };
        let mut settings: RunSettings = serde_json::from_str(&text).map_err(|e| {
            EngineError::config(format!("invalid settings {}: {}", path.display(), e))
        })?;
        if settings.destination.is_empty()
            || !config.destinations.contains_key(&settings.destination)
        {
            settings.destination = config.default_destination.clone();
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::config(format!("cannot serialize settings: {}", e)))?;
        fs::write(path, text).map_err(|e| EngineError::io("write settings", path, e))
    }

    /// Mail address of the user, if a user name is set.
    pub fn mail_address(&self, config: &Config) -> Option<String> {
        let user = self.user.trim();
        if user.is_empty() {
            None
        } else {
            Some(format!("{}@{}", user, config.notification.domain))
        }
    }

    /// Identity written into marker files.
    pub fn operator(&self, config: &Config) -> String {
        match self.mail_address(config) {
            Some(address) => format!("{} / {}", self.user.trim(), address),
            None => config.anonymous_user.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_json(root: &Path) -> String {
        serde_json::json!({
            "target_path": root.join("target"),
            "destinations": { "import": "import", "archive": "archive" },
            "default_destination": "import",
            "log_path": root.join("logs"),
            "process_log": root.join("process.log"),
            "dir_regex": "^[0-9]{6}-[0-9]{4}-[iSZ0-9][0-9]{5}$",
            "max_path_length": 230,
            "blacklist": ["**/Help/HTML5*"],
            "triggers": ["done.txt", "processing.txt"],
            "trigger_name": "done.txt",
            "qualicheck_name": "qc.txt",
            "tsv_name": "manifest.tsv",
            "notification": {
                "drop_path": root.join("mail"),
                "domain": "example.org",
                "subject": "Upload # finished",
                "body": "Files:\n"
            }
        })
        .to_string()
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config::from_json(&sample_json(temp_dir.path()), temp_dir.path())
            .expect("Config should load");
        assert_eq!(config.copy_tool, "robocopy");
        assert_eq!(config.hash_algorithm, ChecksumAlgorithm::Md5);
        assert_eq!(config.manifest, ManifestLabels::default());
        assert_eq!(
            config.destination_root("archive").expect("known destination"),
            temp_dir.path().join("target").join("archive")
        );
        assert!(config.destination_root("nowhere").is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value["colour"] = serde_json::json!("blue");
        let result = Config::from_json(&value.to_string(), temp_dir.path());
        assert!(matches!(result, Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value.as_object_mut().expect("object").remove("trigger_name");
        assert!(Config::from_json(&value.to_string(), temp_dir.path()).is_err());
    }

    #[test]
    fn test_bad_regex_and_glob_are_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value["dir_regex"] = serde_json::json!("([unclosed");
        assert!(Config::from_json(&value.to_string(), temp_dir.path()).is_err());

        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value["blacklist"] = serde_json::json!(["a/[b"]);
        assert!(Config::from_json(&value.to_string(), temp_dir.path()).is_err());
    }

    #[test]
    fn test_app_prefix_is_expanded() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value["process_log"] = serde_json::json!("$APP/cirdan.log");
        let config =
            Config::from_json(&value.to_string(), temp_dir.path()).expect("Config should load");
        assert_eq!(config.process_log, temp_dir.path().join("cirdan.log"));
    }

    #[test]
    fn test_blocking_markers_include_trigger_name() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_json(temp_dir.path())).expect("valid json");
        value["triggers"] = serde_json::json!(["processing.txt"]);
        let config =
            Config::from_json(&value.to_string(), temp_dir.path()).expect("Config should load");
        assert_eq!(config.blocking_markers(), vec!["processing.txt", "done.txt"]);
    }

    #[test]
    fn test_settings_default_when_missing_and_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config::from_json(&sample_json(temp_dir.path()), temp_dir.path())
            .expect("Config should load");
        let path = temp_dir.path().join("settings.json");

        let mut settings = RunSettings::load(&path, &config).expect("defaults");
        assert_eq!(settings, RunSettings::defaults(&config));

        settings.user = "jdoe".to_string();
        settings.destination = "archive".to_string();
        settings.tolerant = true;
        settings.save(&path).expect("save settings");

        let loaded = RunSettings::load(&path, &config).expect("load settings");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.operator(&config), "jdoe / jdoe@example.org");
    }

    #[test]
    fn test_operator_without_user_is_anonymous() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config::from_json(&sample_json(temp_dir.path()), temp_dir.path())
            .expect("Config should load");
        let settings = RunSettings::defaults(&config);
        assert_eq!(settings.mail_address(&config), None);
        assert_eq!(settings.operator(&config), "unknown user");
    }
}
