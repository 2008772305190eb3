//! Profile persistence
//!
//! Save/load/list/delete named `Profile`s as pretty-printed JSON files, one
//! per profile, in a caller-chosen directory.

use std::fs;
use std::path::PathBuf;

use crate::domain::{Profile, TransportError, TransportResult};

/// Name of the profile that can never be deleted
pub const DEFAULT_PROFILE: &str = "Default";

/// Directory of JSON profile files
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

fn config_error(message: impl Into<String>) -> TransportError {
    TransportError::Config(message.into())
}

/// Reject names that could escape the store directory.
/// Allows letters, digits, spaces, hyphens and underscores.
fn sanitize_name(name: &str) -> TransportResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(config_error("Profile name cannot be empty"));
    }
    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(config_error("Invalid profile name"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
    {
        return Err(config_error("Profile name contains invalid characters"));
    }
    Ok(trimmed.to_string())
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory if needed and return the path for `name`
    fn path_for(&self, name: &str) -> TransportResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| config_error(format!("Failed to create profile dir: {e}")))?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Write `profile`, replacing any profile with the same name
    pub fn save(&self, profile: &Profile) -> TransportResult<()> {
        let name = sanitize_name(&profile.name)?;
        let path = self.path_for(&name)?;
        let json = serde_json::to_string_pretty(profile)
            .map_err(|e| config_error(format!("Serialization error: {e}")))?;
        fs::write(&path, json)
            .map_err(|e| config_error(format!("Failed to write profile '{name}': {e}")))?;
        log::debug!("Saved profile '{name}' to {}", path.display());
        Ok(())
    }

    pub fn load(&self, name: &str) -> TransportResult<Profile> {
        let name = sanitize_name(name)?;
        let path = self.path_for(&name)?;
        let json = fs::read_to_string(&path)
            .map_err(|e| config_error(format!("Failed to read profile '{name}': {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| config_error(format!("Failed to parse profile '{name}': {e}")))
    }

    /// Sorted names of every stored profile
    pub fn list(&self) -> TransportResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.dir)
            .map_err(|e| config_error(format!("Failed to read profile dir: {e}")))?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension()?.to_str()? == "json" {
                    path.file_stem()?.to_str().map(String::from)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> TransportResult<()> {
        let name = sanitize_name(name)?;
        if name == DEFAULT_PROFILE {
            return Err(config_error("Cannot delete the Default profile"));
        }
        let path = self.dir.join(format!("{name}.json"));
        if !path.exists() {
            return Err(config_error(format!("Profile '{name}' not found")));
        }
        fs::remove_file(&path)
            .map_err(|e| config_error(format!("Failed to delete profile '{name}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_rejects_path_traversal() {
        assert!(sanitize_name("../evil").is_err());
        assert!(sanitize_name("foo/bar").is_err());
        assert!(sanitize_name("foo\\bar").is_err());
        assert!(sanitize_name("").is_err());
        assert!(sanitize_name("  ").is_err());
    }

    #[test]
    fn sanitize_name_accepts_valid_names() {
        assert_eq!(sanitize_name("Default").unwrap(), "Default");
        assert_eq!(sanitize_name(" Bench FT232R ").unwrap(), "Bench FT232R");
        assert_eq!(sanitize_name("logger_2").unwrap(), "logger_2");
    }

    #[test]
    fn sanitize_name_rejects_special_characters() {
        assert!(sanitize_name("port<>").is_err());
        assert!(sanitize_name("port;drop").is_err());
        assert!(sanitize_name("port|pipe").is_err());
    }
}
