use std::path::{Component, Path};

use glob::Pattern;
use tracing::warn;

use crate::config::WatcherConfig;

/// Decides which change notifications never reach the debouncer.
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    extensions: Vec<String>,
    patterns: Vec<Pattern>,
    max_file_size: u64,
}

impl IgnorePolicy {
    pub fn from_config(cfg: &WatcherConfig) -> Self {
        let extensions = cfg
            .watched_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        let patterns = cfg
            .ignore_patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(error) => {
                    warn!(pattern = %raw, %error, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();

        Self {
            extensions,
            patterns,
            max_file_size: cfg.max_file_size,
        }
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        if !self.extensions.is_empty() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !self.extensions.iter().any(|allowed| *allowed == ext) {
                return true;
            }
        }

        if self.patterns.is_empty() {
            return false;
        }

        // The basename is the last segment, so segment matching covers it.
        path.components().any(|component| match component {
            Component::Normal(segment) => {
                let segment = segment.to_string_lossy();
                self.patterns.iter().any(|pattern| pattern.matches(&segment))
            }
            _ => false,
        })
    }

    /// True for existing regular files larger than the configured cap.
    pub fn exceeds_size_limit(&self, path: &Path) -> bool {
        if self.max_file_size == 0 {
            return false;
        }
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.len() > self.max_file_size)
            .unwrap_or(false)
    }
}
