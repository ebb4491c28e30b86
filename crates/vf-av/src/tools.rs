//! External tool detection.
//!
//! [`ToolRegistry`] resolves the ffmpeg and ffprobe executables once at
//! startup, preferring configured paths over `PATH` lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use vf_core::config::ToolsConfig;
use vf_core::{Error, ToolFailure};

use crate::command::ToolCommand;

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

const KNOWN_TOOLS: &[&str] = &[FFMPEG, FFPROBE];

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if the tool ran.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Resolve every known tool.
    ///
    /// A configured path is used when it exists; otherwise the tool is looked
    /// up on `PATH`. Tools that cannot be found are left out.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let configured = match name {
                FFMPEG => config.ffmpeg_path.as_deref(),
                FFPROBE => config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match configured {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "configured path missing; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn with_paths(paths: impl IntoIterator<Item = (&'static str, PathBuf)>) -> Self {
        Self {
            tools: paths
                .into_iter()
                .map(|(name, path)| (name.to_string(), path))
                .collect(),
        }
    }

    /// Path to a discovered tool, or [`ToolFailure::Unavailable`].
    pub fn require(&self, name: &str) -> vf_core::Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| Error::Tool {
            tool: name.to_string(),
            kind: ToolFailure::Unavailable,
            message: format!("{name} not found; is it installed and in PATH?"),
            diagnostics: Vec::new(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    /// Report availability and version of every known tool.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());
        for &name in KNOWN_TOOLS {
            let info = match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(path).await,
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            };
            infos.push(info);
        }
        infos
    }
}

/// Run `<tool> -version` and return the first line of stdout.
async fn detect_version(path: &Path) -> Option<String> {
    let output = ToolCommand::new(path.to_path_buf())
        .arg("-version")
        .timeout(VERSION_TIMEOUT)
        .execute()
        .await
        .ok()?;
    output.stdout_lossy().lines().next().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_does_not_panic() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        let infos = registry.check_all().await;
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ffmpeg", "ffprobe"]);
    }

    #[test]
    fn configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, b"").unwrap();

        let config = ToolsConfig {
            ffmpeg_path: Some(fake.clone()),
            ffprobe_path: None,
        };
        let registry = ToolRegistry::discover(&config);
        assert_eq!(registry.require(FFMPEG).unwrap(), fake.as_path());
    }

    #[test]
    fn require_missing_tool_is_unavailable() {
        let registry = ToolRegistry::default();
        let err = registry.require(FFPROBE).unwrap_err();
        assert!(matches!(
            err,
            Error::Tool {
                kind: ToolFailure::Unavailable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn tool_info_serializes() {
        let registry = ToolRegistry::with_paths([(FFMPEG, PathBuf::from("/nonexistent/ffmpeg"))]);
        let infos = registry.check_all().await;
        assert!(infos[0].available);
        assert!(infos[0].version.is_none());
        assert!(!infos[1].available);
        let json = serde_json::to_string(&infos).unwrap();
        assert!(json.contains("ffprobe"));
    }

    #[tokio::test]
    async fn version_read_from_first_line() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\necho 'ffmpeg version 6.1'\necho 'built with gcc'\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = ToolRegistry::with_paths([(FFMPEG, fake)]);
        let infos = registry.check_all().await;
        assert_eq!(infos[0].version.as_deref(), Some("ffmpeg version 6.1"));
    }
}
