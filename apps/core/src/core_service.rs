use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{validate, Config, ConfigError};
use crate::extension_installer::{ExtensionInstaller, InstallError, InstallFailure, InstallOutcome};
use crate::file_watcher::FileWatcher;
use crate::filter_profiles::{FilterProfileStore, ProfileError, SearchHistoryEntry};
use crate::ide_detector::{EditorVariant, IdeDetector, IdeError, Variant};
use crate::search::{SearchEngine, SearchError, SearchOptions, SearchResponse};
use crate::task_store::{Database, SqliteTaskStore, StoreError, TaskStore};
use crate::watch_registry::WatchError;

#[derive(Debug)]
pub enum ServiceError {
    Config(ConfigError),
    Store(StoreError),
    Ide(IdeError),
    Install(InstallError),
    /// A single-editor install or uninstall that failed, with its outcome.
    InstallFailed(InstallFailure),
    Watch(WatchError),
    Search(SearchError),
    Profile(ProfileError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(error) => write!(f, "config error: {error}"),
            Self::Store(error) => write!(f, "store error: {error}"),
            Self::Ide(error) => write!(f, "ide error: {error}"),
            Self::Install(error) => write!(f, "install error: {error}"),
            Self::InstallFailed(failure) => write!(f, "install error: {}", failure.error),
            Self::Watch(error) => write!(f, "watch error: {error}"),
            Self::Search(error) => write!(f, "search error: {error}"),
            Self::Profile(error) => write!(f, "profile error: {error}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    /// The outcome recorded for a failed single-editor install or uninstall.
    pub fn outcome(&self) -> Option<&InstallOutcome> {
        match self {
            Self::InstallFailed(failure) => Some(&failure.outcome),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<IdeError> for ServiceError {
    fn from(value: IdeError) -> Self {
        Self::Ide(value)
    }
}

impl From<InstallError> for ServiceError {
    fn from(value: InstallError) -> Self {
        Self::Install(value)
    }
}

impl From<InstallFailure> for ServiceError {
    fn from(value: InstallFailure) -> Self {
        Self::InstallFailed(value)
    }
}

impl From<WatchError> for ServiceError {
    fn from(value: WatchError) -> Self {
        Self::Watch(value)
    }
}

impl From<SearchError> for ServiceError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

impl From<ProfileError> for ServiceError {
    fn from(value: ProfileError) -> Self {
        Self::Profile(value)
    }
}

pub enum InstallTarget {
    One(Variant),
    AllDetected,
}

pub struct CoreService {
    config: Config,
    store: Arc<SqliteTaskStore>,
    detector: Arc<IdeDetector>,
    search: SearchEngine,
    profiles: FilterProfileStore,
}

impl CoreService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        validate(&config)?;
        let db = Database::open_from_config(&config)?;
        let detector = IdeDetector::new().with_version_query(config.installer.query_versions);
        Self::with_parts(config, Arc::new(db), detector)
    }

    pub fn with_parts(
        config: Config,
        db: Arc<Database>,
        detector: IdeDetector,
    ) -> Result<Self, ServiceError> {
        validate(&config)?;
        let store = Arc::new(SqliteTaskStore::new(Arc::clone(&db)));
        let task_store: Arc<dyn TaskStore> = store.clone();
        Ok(Self {
            search: SearchEngine::new(Arc::clone(&db), task_store),
            profiles: FilterProfileStore::new(db),
            config,
            store,
            detector: Arc::new(detector),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteTaskStore> {
        &self.store
    }

    pub fn profiles(&self) -> &FilterProfileStore {
        &self.profiles
    }

    pub fn detect_ides(&self) -> BTreeMap<Variant, EditorVariant> {
        self.detector.detect_all()
    }

    pub fn installer(&self) -> Result<ExtensionInstaller, ServiceError> {
        Ok(ExtensionInstaller::new(
            Arc::clone(&self.detector),
            &self.config.installer,
        )?)
    }

    pub fn list_extensions(&self, variant: Variant) -> Result<Vec<String>, ServiceError> {
        self.ensure_detected();
        Ok(self.installer()?.list_installed(variant)?)
    }

    /// Downloads the newest published release and installs it.
    pub fn install_latest(
        &self,
        target: InstallTarget,
        cancel: &CancelToken,
    ) -> Result<Vec<InstallOutcome>, ServiceError> {
        self.ensure_detected();
        let installer = self.installer()?;
        let descriptor = installer.latest_release(
            &self.config.installer.release_owner,
            &self.config.installer.release_repo,
            cancel,
        )?;

        match target {
            InstallTarget::One(variant) => Ok(vec![installer.install(variant, &descriptor, cancel)?]),
            InstallTarget::AllDetected => Ok(installer.install_to_all(&descriptor, cancel)?),
        }
    }

    /// Installs or upgrades the extension in every supported editor, as
    /// allowed by the IDE integration settings. Records the check time.
    pub fn sync_extension(&mut self, cancel: &CancelToken) -> Result<Vec<InstallOutcome>, ServiceError> {
        let ide = self.config.ide.clone();
        let now = Utc::now();
        if !ide.auto_install && !ide.should_check_for_updates(now) {
            return Ok(Vec::new());
        }

        self.ensure_detected();
        let installer = self.installer()?;
        let descriptor = installer.latest_release(
            &self.config.installer.release_owner,
            &self.config.installer.release_repo,
            cancel,
        )?;

        let mut outcomes = Vec::new();
        for variant in ide.supported_ides.iter().copied() {
            if self.detector.get(variant).is_none() {
                continue;
            }
            let wanted = match self.detector.extension_version(variant, &ide.extension_id) {
                Ok(installed) => ide.auto_update && is_newer(&descriptor.version, &installed),
                Err(IdeError::ExtensionNotInstalled { .. }) => ide.auto_install,
                Err(error) => {
                    warn!(%variant, %error, "cannot read installed extension version");
                    ide.auto_install
                }
            };
            if !wanted {
                continue;
            }
            match installer.install(variant, &descriptor, cancel) {
                Ok(outcome) => outcomes.push(outcome),
                Err(failure) => outcomes.push(failure.outcome),
            }
        }

        self.config.ide.last_update_check = Some(now);
        if let Err(error) = crate::config::save(&self.config) {
            warn!(%error, "failed to persist last update check");
        }
        Ok(outcomes)
    }

    /// Removes `extension_id`, or the configured extension when `None`.
    pub fn uninstall_extension(
        &self,
        variant: Variant,
        extension_id: Option<&str>,
    ) -> Result<InstallOutcome, ServiceError> {
        self.ensure_detected();
        let id = extension_id.unwrap_or(&self.config.installer.extension_id);
        Ok(self.installer()?.uninstall(variant, id)?)
    }

    pub fn start_watcher(&self) -> Result<FileWatcher, ServiceError> {
        let store: Arc<dyn TaskStore> = self.store.clone();
        let watcher = FileWatcher::new(store, self.config.watcher.clone())?;
        info!("file watcher started");
        Ok(watcher)
    }

    pub fn search(&self, options: &SearchOptions) -> Result<SearchResponse, ServiceError> {
        Ok(self.search.search(options)?)
    }

    /// Free-text search with the configured defaults.
    pub fn search_text(&self, query: &str) -> Result<SearchResponse, ServiceError> {
        self.search(&self.search_options(query))
    }

    /// Runs a saved profile, optionally narrowed by `query`, and counts the use.
    pub fn search_with_profile(
        &self,
        profile_id: i64,
        query: &str,
    ) -> Result<SearchResponse, ServiceError> {
        let profile = self.profiles.get(profile_id)?;
        let options = self.search_options(query).with_profile(&profile);
        let response = self.search(&options)?;
        self.profiles.mark_used(profile_id)?;
        Ok(response)
    }

    pub fn search_history(&self, limit: Option<usize>) -> Result<Vec<SearchHistoryEntry>, ServiceError> {
        Ok(self.profiles.history(limit)?)
    }

    /// Falls back to the configured retention when `days` is `None`.
    pub fn clean_history(&self, days: Option<u32>) -> Result<usize, ServiceError> {
        let days = days.unwrap_or(self.config.search.history_retention_days);
        Ok(self.profiles.clean_history(Some(days))?)
    }

    /// Options for `query` seeded with the configured search defaults.
    pub fn search_options(&self, query: &str) -> SearchOptions {
        SearchOptions {
            max_results: self.config.search.max_results,
            fuzzy_threshold: self.config.search.fuzzy_threshold,
            ..SearchOptions::query(query)
        }
    }

    fn ensure_detected(&self) {
        if self.detector.all_detected().is_empty() {
            self.detector.detect_all();
        }
    }
}

/// Dotted numeric comparison; non-numeric parts compare as zero.
fn is_newer(candidate: &str, installed: &str) -> bool {
    let parts = |version: &str| -> Vec<u64> {
        version
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (candidate, installed) = (parts(candidate), parts(installed));
    let len = candidate.len().max(installed.len());
    for i in 0..len {
        let a = candidate.get(i).copied().unwrap_or(0);
        let b = installed.get(i).copied().unwrap_or(0);
        if a != b {
            return a > b;
        }
    }
    false
}
