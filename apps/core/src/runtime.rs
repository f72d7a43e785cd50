use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use serde::Serialize;
use tracing::{error, info};

use crate::cancel::CancelToken;
use crate::config::{self, ConfigError};
use crate::core_service::{CoreService, InstallTarget, ServiceError};
use crate::ide_detector::Variant;
use crate::logging;
use crate::search::SearchField;
use crate::search_filters::{SortDirection, SortKey};

const USAGE: &str = "usage: gorev-core [--config <path>] <command>
commands:
  detect
  extensions <variant>
  install-latest [variant|all]
  uninstall <variant> [extension-id]
  sync
  search [--sort <key>] [--asc] [--fields <a,b>] <query...>
  history [limit]
  clean-history [days]
  watch <task-id> <path>...";

#[derive(Debug)]
pub enum RuntimeError {
    Usage(String),
    Config(ConfigError),
    Service(ServiceError),
    Output(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(message) => write!(f, "{message}\n{USAGE}"),
            Self::Config(error) => write!(f, "config error: {error}"),
            Self::Service(error) => write!(f, "service error: {error}"),
            Self::Output(error) => write!(f, "output error: {error}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ServiceError> for RuntimeError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Detect,
    Extensions(Variant),
    /// `None` installs into every detected editor.
    InstallLatest(Option<Variant>),
    Uninstall {
        variant: Variant,
        extension_id: Option<String>,
    },
    /// Install or upgrade per the IDE integration settings.
    SyncExtension,
    Search(SearchRequest),
    History(Option<usize>),
    CleanHistory(Option<u32>),
    Watch {
        task_id: String,
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub sort_by: Option<SortKey>,
    pub ascending: bool,
    /// Empty means every field.
    pub fields: Vec<SearchField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: Option<PathBuf>,
    pub command: Command,
}

pub fn parse_cli_args(args: &[String]) -> Result<CliOptions, RuntimeError> {
    let mut config_path = None;
    let mut rest: Vec<&str> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage("--config requires a path"))?;
                config_path = Some(PathBuf::from(value));
            }
            "-h" | "--help" => return Err(usage("help requested")),
            other => rest.push(other),
        }
    }

    let (name, params) = rest
        .split_first()
        .ok_or_else(|| usage("missing command"))?;

    let command = match (*name, params) {
        ("detect", []) => Command::Detect,
        ("extensions", [variant]) => Command::Extensions(parse_variant(variant)?),
        ("install-latest", []) | ("install-latest", ["all"]) => Command::InstallLatest(None),
        ("install-latest", [variant]) => Command::InstallLatest(Some(parse_variant(variant)?)),
        ("uninstall", [variant]) => Command::Uninstall {
            variant: parse_variant(variant)?,
            extension_id: None,
        },
        ("uninstall", [variant, id]) => Command::Uninstall {
            variant: parse_variant(variant)?,
            extension_id: Some((*id).to_string()),
        },
        ("sync", []) => Command::SyncExtension,
        ("search", words) => Command::Search(parse_search(words)?),
        ("history", []) => Command::History(None),
        ("history", [limit]) => Command::History(Some(parse_number(limit, "limit")?)),
        ("clean-history", []) => Command::CleanHistory(None),
        ("clean-history", [days]) => Command::CleanHistory(Some(parse_number(days, "days")?)),
        ("watch", [task_id, paths @ ..]) if !paths.is_empty() => Command::Watch {
            task_id: (*task_id).to_string(),
            paths: paths.iter().map(PathBuf::from).collect(),
        },
        (other, _) => return Err(usage(&format!("invalid arguments for '{other}'"))),
    };

    Ok(CliOptions {
        config_path,
        command,
    })
}

pub fn run_with_options(options: CliOptions) -> Result<(), RuntimeError> {
    let config = config::load(options.config_path.as_deref())?;
    if !config.config_path.exists() {
        config::save(&config)?;
    }
    if let Err(error) = logging::init(&config.log_level) {
        eprintln!("[gorev-core] logging disabled: {error}");
    }
    info!(
        config_path = %config.config_path.display(),
        db_path = %config.db_path.display(),
        command = ?options.command,
        "gorev-core starting"
    );

    let mut service = CoreService::new(config)?;
    let cancel = CancelToken::new();

    match options.command {
        Command::Detect => print_json(&service.detect_ides()),
        Command::Extensions(variant) => print_json(&service.list_extensions(variant)?),
        Command::InstallLatest(variant) => {
            let target = variant.map_or(InstallTarget::AllDetected, InstallTarget::One);
            print_json(&service.install_latest(target, &cancel).map_err(report_outcome)?)
        }
        Command::Uninstall {
            variant,
            extension_id,
        } => print_json(
            &service
                .uninstall_extension(variant, extension_id.as_deref())
                .map_err(report_outcome)?,
        ),
        Command::SyncExtension => print_json(&service.sync_extension(&cancel)?),
        Command::Search(request) => {
            let mut options = service.search_options(&request.query);
            if let Some(sort_by) = request.sort_by {
                options.sort_by = sort_by;
            }
            if request.ascending {
                options.sort_direction = SortDirection::Asc;
            }
            options.search_fields = request.fields;
            print_json(&service.search(&options)?)
        }
        Command::History(limit) => print_json(&service.search_history(limit)?),
        Command::CleanHistory(days) => {
            let removed = service.clean_history(days)?;
            print_json(&BTreeMap::from([("removed", removed)]))
        }
        Command::Watch { task_id, paths } => watch(&service, &task_id, &paths),
    }
}

fn watch(service: &CoreService, task_id: &str, paths: &[PathBuf]) -> Result<(), RuntimeError> {
    let watcher = service.start_watcher()?;
    for path in paths {
        let canonical = watcher
            .add_task_path(task_id, path)
            .map_err(ServiceError::from)?;
        println!("[gorev-core] watching {} for {task_id}", canonical.display());
    }

    let events = watcher.subscribe();
    let printer = thread::spawn(move || {
        for event in events {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => error!(error = %err, "failed to encode file change"),
            }
        }
    });

    println!("[gorev-core] close stdin to stop");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if line.is_err() {
            break;
        }
    }

    watcher.stop();
    drop(watcher);
    if printer.join().is_err() {
        return Err(RuntimeError::Output("event printer panicked".into()));
    }
    Ok(())
}

/// Prints the outcome carried by a failed install before the error surfaces.
fn report_outcome(error: ServiceError) -> RuntimeError {
    if let Some(outcome) = error.outcome() {
        if let Err(output) = print_json(outcome) {
            error!(error = %output, "could not print install outcome");
        }
    }
    RuntimeError::Service(error)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), RuntimeError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| RuntimeError::Output(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn parse_search(words: &[&str]) -> Result<SearchRequest, RuntimeError> {
    let mut request = SearchRequest::default();
    let mut terms = Vec::new();
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        match *word {
            "--sort" => {
                let key = iter.next().ok_or_else(|| usage("--sort requires a key"))?;
                let sort_by = SortKey::parse(key)
                    .ok_or_else(|| usage(&format!("unknown sort key: {key}")))?;
                request.sort_by = Some(sort_by);
            }
            "--asc" => request.ascending = true,
            "--fields" => {
                let list = iter.next().ok_or_else(|| usage("--fields requires a list"))?;
                for name in list.split(',').filter(|name| !name.trim().is_empty()) {
                    let field = SearchField::parse(name)
                        .ok_or_else(|| usage(&format!("unknown search field: {name}")))?;
                    request.fields.push(field);
                }
            }
            term => terms.push(term),
        }
    }

    if terms.is_empty() {
        return Err(usage("search requires a query"));
    }
    request.query = terms.join(" ");
    Ok(request)
}

fn parse_variant(value: &str) -> Result<Variant, RuntimeError> {
    Variant::parse(value).ok_or_else(|| usage(&format!("unknown editor variant: {value}")))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, RuntimeError> {
    value
        .parse()
        .map_err(|_| usage(&format!("{what} must be a positive number: {value}")))
}

fn usage(message: &str) -> RuntimeError {
    RuntimeError::Usage(message.to_string())
}
