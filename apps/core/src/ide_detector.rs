use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::platform::{self, CandidatePaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    VsCode,
    Cursor,
    Windsurf,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::VsCode, Variant::Cursor, Variant::Windsurf];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VsCode => "vscode",
            Self::Cursor => "cursor",
            Self::Windsurf => "windsurf",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::VsCode => "Visual Studio Code",
            Self::Cursor => "Cursor",
            Self::Windsurf => "Windsurf",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vscode" | "code" => Some(Self::VsCode),
            "cursor" => Some(Self::Cursor),
            "windsurf" => Some(Self::Windsurf),
            _ => None,
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected editor installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorVariant {
    pub variant: Variant,
    pub name: String,
    pub executable_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub extensions_path: Option<PathBuf>,
    pub version: Option<String>,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorLayout {
    pub variant: Variant,
    pub candidates: CandidatePaths,
}

impl EditorLayout {
    pub fn new(variant: Variant, candidates: CandidatePaths) -> Self {
        Self { variant, candidates }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdeError {
    #[error("{0} is not detected")]
    NotDetected(Variant),
    #[error("extensions directory not found for {0}")]
    ExtensionsDirMissing(Variant),
    #[error("failed to read extensions directory {path}: {message}")]
    ReadExtensions { path: PathBuf, message: String },
    #[error("extension {id} is not installed in {variant}")]
    ExtensionNotInstalled { id: String, variant: Variant },
    #[error("invalid extension id: {0}")]
    InvalidExtensionId(String),
}

pub struct IdeDetector {
    layouts: Vec<EditorLayout>,
    query_versions: bool,
    detected: RwLock<BTreeMap<Variant, EditorVariant>>,
}

impl Default for IdeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl IdeDetector {
    /// Uses the well-known install locations of the current OS.
    pub fn new() -> Self {
        let layouts = Variant::ALL
            .iter()
            .map(|variant| EditorLayout::new(*variant, platform::editor_candidates(*variant)))
            .collect();
        Self::with_layouts(layouts)
    }

    pub fn with_layouts(layouts: Vec<EditorLayout>) -> Self {
        Self {
            layouts,
            query_versions: false,
            detected: RwLock::new(BTreeMap::new()),
        }
    }

    /// Runs `<exe> --version` during detection and keeps the first line.
    pub fn with_version_query(mut self, enabled: bool) -> Self {
        self.query_versions = enabled;
        self
    }

    pub fn detect_all(&self) -> BTreeMap<Variant, EditorVariant> {
        let mut found = BTreeMap::new();
        for layout in &self.layouts {
            if let Some(editor) = self.detect_layout(layout) {
                info!(
                    variant = %editor.variant,
                    executable = %editor.executable_path.display(),
                    "editor detected"
                );
                found.insert(layout.variant, editor);
            } else {
                debug!(variant = %layout.variant, "editor not found");
            }
        }

        *self.write_detected() = found.clone();
        found
    }

    pub fn get(&self, variant: Variant) -> Option<EditorVariant> {
        self.read_detected().get(&variant).cloned()
    }

    pub fn all_detected(&self) -> BTreeMap<Variant, EditorVariant> {
        self.read_detected().clone()
    }

    pub fn is_extension_installed(&self, variant: Variant, extension_id: &str) -> Result<bool, IdeError> {
        Ok(self.find_extension_dir(variant, extension_id)?.is_some())
    }

    /// Version is the trailing `-` segment of the matching directory name.
    pub fn extension_version(&self, variant: Variant, extension_id: &str) -> Result<String, IdeError> {
        let not_installed = || IdeError::ExtensionNotInstalled {
            id: extension_id.to_string(),
            variant,
        };
        let name = self
            .find_extension_dir(variant, extension_id)?
            .ok_or_else(not_installed)?;
        name.rsplit_once('-')
            .map(|(_, version)| version.to_string())
            .ok_or_else(not_installed)
    }

    fn find_extension_dir(&self, variant: Variant, extension_id: &str) -> Result<Option<String>, IdeError> {
        let needle = extension_id
            .split_once('.')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| IdeError::InvalidExtensionId(extension_id.to_string()))?;

        let editor = self.get(variant).ok_or(IdeError::NotDetected(variant))?;
        let dir = editor
            .extensions_path
            .ok_or(IdeError::ExtensionsDirMissing(variant))?;

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|error| IdeError::ReadExtensions {
                path: dir.clone(),
                message: error.to_string(),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.contains(needle) {
                return Ok(Some(name.into_owned()));
            }
        }
        Ok(None)
    }

    fn detect_layout(&self, layout: &EditorLayout) -> Option<EditorVariant> {
        let executable = first_existing(&layout.candidates.executables, platform::file_exists)?;
        let version = if self.query_versions {
            query_version(&executable)
        } else {
            None
        };

        Some(EditorVariant {
            variant: layout.variant,
            name: layout.variant.display_name().to_string(),
            executable_path: executable,
            config_path: first_existing(&layout.candidates.config_dirs, platform::dir_exists),
            extensions_path: first_existing(&layout.candidates.extension_dirs, platform::dir_exists),
            version,
            installed: true,
        })
    }

    fn read_detected(&self) -> RwLockReadGuard<'_, BTreeMap<Variant, EditorVariant>> {
        self.detected
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_detected(&self) -> RwLockWriteGuard<'_, BTreeMap<Variant, EditorVariant>> {
        self.detected
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn first_existing(candidates: &[PathBuf], exists: fn(&Path) -> bool) -> Option<PathBuf> {
    candidates.iter().find(|path| exists(path)).cloned()
}

fn query_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
