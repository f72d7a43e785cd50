use std::path::{Component, Path, PathBuf};

use crate::ide_detector::Variant;

/// Ordered candidate locations for one editor variant. The first existing
/// entry in each list wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePaths {
    pub executables: Vec<PathBuf>,
    pub config_dirs: Vec<PathBuf>,
    pub extension_dirs: Vec<PathBuf>,
}

pub fn file_exists(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.is_file()
}

pub fn dir_exists(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.is_dir()
}

/// Lexical cleanup: drops `.` segments, folds `..` against preceding
/// segments and collapses repeated separators. Symlinks are left alone.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    let mut depth = 0_usize;

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => cleaned.push(prefix.as_os_str()),
            Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    cleaned.pop();
                    depth -= 1;
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            Component::Normal(segment) => {
                cleaned.push(segment);
                depth += 1;
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

/// Existing paths are stat'ed. Missing paths count as directories when they
/// carry no extension.
pub fn looks_like_directory(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(_) => path.extension().is_none(),
    }
}

pub fn home_dir() -> Option<PathBuf> {
    env_path("HOME").or_else(|| env_path("USERPROFILE"))
}

pub fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn stable_app_data_dir() -> PathBuf {
    if let Some(dir) = env_path("GOREV_HOME") {
        return dir;
    }
    home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".gorev")
}

pub fn editor_candidates(variant: Variant) -> CandidatePaths {
    let home = home_dir().unwrap_or_default();
    os_candidates(variant, &home)
}

#[cfg(target_os = "windows")]
fn os_candidates(variant: Variant, home: &Path) -> CandidatePaths {
    let local = env_path("LOCALAPPDATA").unwrap_or_else(|| home.join("AppData").join("Local"));
    let roaming = env_path("APPDATA").unwrap_or_else(|| home.join("AppData").join("Roaming"));
    let program_files = env_path("PROGRAMFILES").unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
    let program_files_x86 = env_path("PROGRAMFILES(X86)")
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)"));
    let user = env_path("USERPROFILE").unwrap_or_else(|| home.to_path_buf());

    match variant {
        Variant::VsCode => CandidatePaths {
            executables: vec![
                local.join("Programs").join("Microsoft VS Code").join("Code.exe"),
                program_files.join("Microsoft VS Code").join("Code.exe"),
                program_files_x86.join("Microsoft VS Code").join("Code.exe"),
            ],
            config_dirs: vec![roaming.join("Code").join("User")],
            extension_dirs: vec![user.join(".vscode").join("extensions")],
        },
        Variant::Cursor => CandidatePaths {
            executables: vec![
                local.join("Programs").join("cursor").join("Cursor.exe"),
                program_files.join("Cursor").join("Cursor.exe"),
            ],
            config_dirs: vec![roaming.join("Cursor").join("User")],
            extension_dirs: vec![user.join(".cursor").join("extensions")],
        },
        Variant::Windsurf => CandidatePaths {
            executables: vec![
                local.join("Programs").join("Windsurf").join("Windsurf.exe"),
                program_files.join("Windsurf").join("Windsurf.exe"),
            ],
            config_dirs: vec![roaming.join("Windsurf").join("User")],
            extension_dirs: vec![user.join(".windsurf").join("extensions")],
        },
    }
}

#[cfg(target_os = "macos")]
fn os_candidates(variant: Variant, home: &Path) -> CandidatePaths {
    let support = home.join("Library").join("Application Support");
    let (app, bin, support_name, dot_dir) = match variant {
        Variant::VsCode => ("Visual Studio Code.app", "code", "Code", ".vscode"),
        Variant::Cursor => ("Cursor.app", "cursor", "Cursor", ".cursor"),
        Variant::Windsurf => ("Windsurf.app", "windsurf", "Windsurf", ".windsurf"),
    };

    CandidatePaths {
        executables: vec![
            PathBuf::from("/Applications")
                .join(app)
                .join("Contents/Resources/app/bin")
                .join(bin),
            PathBuf::from("/usr/local/bin").join(bin),
        ],
        config_dirs: vec![support.join(support_name).join("User")],
        extension_dirs: vec![home.join(dot_dir).join("extensions")],
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn os_candidates(variant: Variant, home: &Path) -> CandidatePaths {
    let config = home.join(".config");
    match variant {
        Variant::VsCode => CandidatePaths {
            executables: vec![
                PathBuf::from("/usr/bin/code"),
                PathBuf::from("/snap/code/current/usr/share/code/bin/code"),
                home.join(".local").join("bin").join("code"),
            ],
            config_dirs: vec![config.join("Code").join("User")],
            extension_dirs: vec![home.join(".vscode").join("extensions")],
        },
        Variant::Cursor => CandidatePaths {
            executables: vec![
                PathBuf::from("/usr/bin/cursor"),
                home.join(".local").join("bin").join("cursor"),
                PathBuf::from("/opt/cursor/cursor"),
            ],
            config_dirs: vec![config.join("Cursor").join("User")],
            extension_dirs: vec![home.join(".cursor").join("extensions")],
        },
        Variant::Windsurf => CandidatePaths {
            executables: vec![
                PathBuf::from("/usr/bin/windsurf"),
                home.join(".local").join("bin").join("windsurf"),
                PathBuf::from("/opt/windsurf/windsurf"),
            ],
            config_dirs: vec![config.join("Windsurf").join("User")],
            extension_dirs: vec![home.join(".windsurf").join("extensions")],
        },
    }
}
