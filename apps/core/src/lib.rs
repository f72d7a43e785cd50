pub mod cancel;
pub mod config;
pub mod core_service;
pub mod debounce;
pub mod extension_installer;
pub mod file_watcher;
pub mod filter_profiles;
pub mod fuzzy;
pub mod ide_detector;
pub mod ignore_policy;
pub mod logging;
pub mod model;
pub mod nlp;
pub mod platform;
pub mod runtime;
pub mod search;
pub mod search_filters;
pub mod suggestions;
pub mod task_reactor;
pub mod task_store;
pub mod watch_backend;
pub mod watch_events;
pub mod watch_registry;
