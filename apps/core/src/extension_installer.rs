use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::InstallerConfig;
use crate::ide_detector::{EditorVariant, IdeDetector, IdeError, Variant};

pub const VSIX_SUFFIX: &str = ".vsix";
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const READ_CHUNK: usize = 64 * 1024;
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub download_url: String,
    pub sha256: Option<String>,
}

impl ExtensionDescriptor {
    fn validate(&self) -> Result<(), InstallError> {
        let well_formed = self
            .id
            .split_once('.')
            .map(|(publisher, name)| !publisher.is_empty() && !name.is_empty())
            .unwrap_or(false);
        if !well_formed {
            return Err(InstallError::InvalidArgument(format!(
                "extension id must be publisher.name, got {:?}",
                self.id
            )));
        }
        if self.version.trim().is_empty() {
            return Err(InstallError::InvalidArgument("extension version is empty".into()));
        }
        if self.download_url.trim().is_empty() {
            return Err(InstallError::InvalidArgument("download url is empty".into()));
        }
        Ok(())
    }

    fn archive_name(&self) -> String {
        format!("{}-{}{VSIX_SUFFIX}", self.id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub success: bool,
    pub message: String,
    pub variant: Variant,
    pub extension_id: String,
    pub version: Option<String>,
}

impl InstallOutcome {
    fn new(variant: Variant, extension_id: &str) -> Self {
        Self {
            success: false,
            message: String::new(),
            variant,
            extension_id: extension_id.to_string(),
            version: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} is not detected")]
    IdeNotDetected(Variant),
    #[error("download failed with HTTP status {0}")]
    DownloadFailed(u16),
    #[error("http error: {0}")]
    Http(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumFailed { expected: String, actual: String },
    #[error("editor command failed: {0}")]
    InstallFailed(String),
    #[error("extension {id} is not installed in {variant}")]
    ExtensionNotInstalled { id: String, variant: Variant },
    #[error("no supported editors detected")]
    NoIdesDetected,
    #[error("release {0} has no .vsix asset")]
    NoVsixAsset(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ide(#[from] IdeError),
}

/// A failed install still carries its outcome so batch callers can report it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct InstallFailure {
    pub outcome: InstallOutcome,
    #[source]
    pub error: InstallError,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

enum InstallStep {
    AlreadyCurrent,
    Installed,
}

pub struct ExtensionInstaller {
    detector: Arc<IdeDetector>,
    agent: ureq::Agent,
    scratch_dir: PathBuf,
    api_base: String,
    extension_id: String,
    user_agent: String,
}

impl ExtensionInstaller {
    pub fn new(detector: Arc<IdeDetector>, cfg: &InstallerConfig) -> Result<Self, InstallError> {
        let root = cfg.scratch_root.clone().unwrap_or_else(std::env::temp_dir);
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let scratch_dir = root.join(format!(
            "gorev-extensions-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&scratch_dir)?;

        let agent = ureq::AgentBuilder::new().timeout(cfg.timeout()).build();

        Ok(Self {
            detector,
            agent,
            scratch_dir,
            api_base: cfg.release_api_base.trim_end_matches('/').to_string(),
            extension_id: cfg.extension_id.clone(),
            user_agent: format!("gorev-extension-installer/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn install(
        &self,
        variant: Variant,
        descriptor: &ExtensionDescriptor,
        cancel: &CancelToken,
    ) -> Result<InstallOutcome, InstallFailure> {
        let mut outcome = InstallOutcome::new(variant, &descriptor.id);
        match self.try_install(variant, descriptor, cancel) {
            Ok(step) => {
                outcome.success = true;
                outcome.version = Some(descriptor.version.clone());
                outcome.message = match step {
                    InstallStep::AlreadyCurrent => format!(
                        "{} {} is already installed in {}",
                        descriptor.id,
                        descriptor.version,
                        variant.display_name()
                    ),
                    InstallStep::Installed => format!(
                        "installed {} {} in {}",
                        descriptor.id,
                        descriptor.version,
                        variant.display_name()
                    ),
                };
                info!(%variant, id = %descriptor.id, version = %descriptor.version, "{}", outcome.message);
                Ok(outcome)
            }
            Err(error) => {
                outcome.message = format!(
                    "failed to install {} in {}: {error}",
                    descriptor.id,
                    variant.display_name()
                );
                warn!(%variant, id = %descriptor.id, %error, "extension install failed");
                Err(InstallFailure { outcome, error })
            }
        }
    }

    /// Installs into every detected editor. Individual failures are recorded
    /// in the returned outcomes.
    pub fn install_to_all(
        &self,
        descriptor: &ExtensionDescriptor,
        cancel: &CancelToken,
    ) -> Result<Vec<InstallOutcome>, InstallError> {
        let detected = self.detector.all_detected();
        if detected.is_empty() {
            return Err(InstallError::NoIdesDetected);
        }

        let outcomes = detected
            .keys()
            .map(|variant| match self.install(*variant, descriptor, cancel) {
                Ok(outcome) => outcome,
                Err(failure) => failure.outcome,
            })
            .collect();
        Ok(outcomes)
    }

    pub fn uninstall(&self, variant: Variant, extension_id: &str) -> Result<InstallOutcome, InstallFailure> {
        let mut outcome = InstallOutcome::new(variant, extension_id);
        match self.try_uninstall(variant, extension_id) {
            Ok(()) => {
                outcome.success = true;
                outcome.message = format!(
                    "uninstalled {extension_id} from {}",
                    variant.display_name()
                );
                info!(%variant, id = extension_id, "extension uninstalled");
                Ok(outcome)
            }
            Err(error) => {
                outcome.message = format!(
                    "failed to uninstall {extension_id} from {}: {error}",
                    variant.display_name()
                );
                warn!(%variant, id = extension_id, %error, "extension uninstall failed");
                Err(InstallFailure { outcome, error })
            }
        }
    }

    pub fn list_installed(&self, variant: Variant) -> Result<Vec<String>, InstallError> {
        let editor = self.editor(variant)?;
        let output = Command::new(&editor.executable_path)
            .arg("--list-extensions")
            .stdin(Stdio::null())
            .output()
            .map_err(|error| spawn_failed(&editor, error))?;
        if !output.status.success() {
            return Err(InstallError::InstallFailed(format!(
                "{} --list-extensions exited with {}",
                editor.executable_path.display(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetches the archive into the scratch directory and verifies it.
    pub fn download_vsix(
        &self,
        descriptor: &ExtensionDescriptor,
        cancel: &CancelToken,
    ) -> Result<PathBuf, InstallError> {
        descriptor.validate()?;
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        fs::create_dir_all(&self.scratch_dir)?;
        let target = self.scratch_dir.join(descriptor.archive_name());
        if target.exists() {
            if let Some(expected) = &descriptor.sha256 {
                if verify_checksum(&target, expected).unwrap_or(false) {
                    debug!(path = %target.display(), "reusing verified archive");
                    return Ok(target);
                }
            }
            fs::remove_file(&target)?;
        }

        info!(url = %descriptor.download_url, "downloading extension archive");
        let response = self.get(&descriptor.download_url, None)?;
        if let Err(error) = stream_to_file(response.into_reader(), &target, cancel) {
            let _ = fs::remove_file(&target);
            return Err(error);
        }

        if let Some(expected) = &descriptor.sha256 {
            let actual = match sha256_file(&target) {
                Ok(actual) => actual,
                Err(error) => {
                    let _ = fs::remove_file(&target);
                    return Err(error.into());
                }
            };
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                let _ = fs::remove_file(&target);
                return Err(InstallError::ChecksumFailed {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(target)
    }

    /// Looks up the newest release and describes its first `.vsix` asset.
    pub fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancelToken,
    ) -> Result<ExtensionDescriptor, InstallError> {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        let url = format!("{}/repos/{owner}/{repo}/releases/latest", self.api_base);
        let release: ReleaseInfo = self
            .get(&url, Some(GITHUB_ACCEPT))?
            .into_json()
            .map_err(|error| InstallError::Http(format!("invalid release payload: {error}")))?;

        let asset = release
            .assets
            .iter()
            .find(|asset| asset.name.ends_with(VSIX_SUFFIX))
            .ok_or_else(|| InstallError::NoVsixAsset(release.tag_name.clone()))?;
        let version = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name)
            .to_string();
        let (publisher, name) = self
            .extension_id
            .split_once('.')
            .unwrap_or(("", self.extension_id.as_str()));

        Ok(ExtensionDescriptor {
            id: self.extension_id.clone(),
            name: name.to_string(),
            version,
            publisher: publisher.to_string(),
            download_url: asset.browser_download_url.clone(),
            sha256: None,
        })
    }

    pub fn cleanup(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.scratch_dir) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }

    fn try_install(
        &self,
        variant: Variant,
        descriptor: &ExtensionDescriptor,
        cancel: &CancelToken,
    ) -> Result<InstallStep, InstallError> {
        descriptor.validate()?;
        let editor = self.editor(variant)?;

        if let Ok(installed) = self.detector.extension_version(variant, &descriptor.id) {
            if installed == descriptor.version {
                return Ok(InstallStep::AlreadyCurrent);
            }
            debug!(%variant, %installed, wanted = %descriptor.version, "upgrading extension");
        }

        let archive = ScratchFile(self.download_vsix(descriptor, cancel)?);
        let archive_arg = archive.0.to_string_lossy().into_owned();
        run_editor_cli(&editor, &["--install-extension", &archive_arg])?;
        Ok(InstallStep::Installed)
    }

    fn try_uninstall(&self, variant: Variant, extension_id: &str) -> Result<(), InstallError> {
        let editor = self.editor(variant)?;
        if !self.detector.is_extension_installed(variant, extension_id)? {
            return Err(InstallError::ExtensionNotInstalled {
                id: extension_id.to_string(),
                variant,
            });
        }
        run_editor_cli(&editor, &["--uninstall-extension", extension_id])
    }

    fn editor(&self, variant: Variant) -> Result<EditorVariant, InstallError> {
        self.detector
            .get(variant)
            .ok_or(InstallError::IdeNotDetected(variant))
    }

    fn get(&self, url: &str, accept: Option<&str>) -> Result<ureq::Response, InstallError> {
        let mut request = self.agent.get(url).set("User-Agent", &self.user_agent);
        if let Some(accept) = accept {
            request = request.set("Accept", accept);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(InstallError::DownloadFailed(status)),
            Err(error) => return Err(InstallError::Http(error.to_string())),
        };
        if response.status() != 200 {
            return Err(InstallError::DownloadFailed(response.status()));
        }
        Ok(response)
    }
}

impl Drop for ExtensionInstaller {
    fn drop(&mut self) {
        if let Err(error) = self.cleanup() {
            warn!(dir = %self.scratch_dir.display(), %error, "failed to remove scratch dir");
        }
    }
}

/// Removes the wrapped archive when dropped.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.0) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.0.display(), %error, "failed to remove downloaded archive");
            }
        }
    }
}

/// Case-insensitive comparison of the file's SHA-256 against `expected`.
pub fn verify_checksum(path: &Path, expected: &str) -> io::Result<bool> {
    let actual = sha256_file(path)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Copies the body through a reader thread so a stalled read cannot outlive
/// cancellation. The agent timeout still bounds the reader thread itself.
fn stream_to_file(
    reader: impl Read + Send + 'static,
    target: &Path,
    cancel: &CancelToken,
) -> Result<(), InstallError> {
    let mut file = File::create(target)?;
    let chunks = spawn_body_reader(reader)?;
    loop {
        if cancel.is_cancelled() {
            debug!(path = %target.display(), "download cancelled");
            return Err(InstallError::Cancelled);
        }
        match chunks.recv_timeout(CANCEL_POLL) {
            Ok(BodyChunk::Data(bytes)) => file.write_all(&bytes)?,
            Ok(BodyChunk::End) => break,
            Ok(BodyChunk::Failed(error)) => return Err(error.into()),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                let stopped = io::Error::new(io::ErrorKind::UnexpectedEof, "body reader stopped");
                return Err(stopped.into());
            }
        }
    }
    file.flush()?;
    Ok(())
}

enum BodyChunk {
    Data(Vec<u8>),
    End,
    Failed(io::Error),
}

fn spawn_body_reader(mut reader: impl Read + Send + 'static) -> io::Result<Receiver<BodyChunk>> {
    let (tx, rx) = bounded(4);
    thread::Builder::new()
        .name("gorev-download".into())
        .spawn(move || {
            let mut buf = vec![0_u8; READ_CHUNK];
            loop {
                let chunk = match reader.read(&mut buf) {
                    Ok(0) => BodyChunk::End,
                    Ok(read) => BodyChunk::Data(buf[..read].to_vec()),
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => BodyChunk::Failed(error),
                };
                let last = !matches!(chunk, BodyChunk::Data(_));
                // A dropped receiver means the download was abandoned.
                if tx.send(chunk).is_err() || last {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn run_editor_cli(editor: &EditorVariant, args: &[&str]) -> Result<(), InstallError> {
    debug!(exe = %editor.executable_path.display(), ?args, "running editor cli");
    let status = Command::new(&editor.executable_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|error| spawn_failed(editor, error))?;
    if !status.success() {
        return Err(InstallError::InstallFailed(format!(
            "{} {} exited with {status}",
            editor.executable_path.display(),
            args.first().copied().unwrap_or_default()
        )));
    }
    Ok(())
}

fn spawn_failed(editor: &EditorVariant, error: io::Error) -> InstallError {
    InstallError::InstallFailed(format!(
        "failed to run {}: {error}",
        editor.executable_path.display()
    ))
}
