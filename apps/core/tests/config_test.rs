use gorev_core::config::{self, Config};
use gorev_core::ide_detector::Variant;

#[test]
fn accepts_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.watcher.debounce_ms, 500);
    assert_eq!(cfg.watcher.max_file_size, 10 * 1024 * 1024);
    assert!(cfg.watcher.auto_update_status);
    assert!(cfg.watcher.watched_extensions.contains(&".md".to_string()));
    assert!(cfg.watcher.ignore_patterns.contains(&"node_modules".to_string()));
    assert_eq!(cfg.search.max_results, 50);
    assert_eq!(cfg.installer.timeout_secs, 30);
    assert!(cfg.db_path.to_string_lossy().contains("gorev"));
    assert!(config::validate(&cfg).is_ok());
}

#[test]
fn rejects_out_of_range_values() {
    let mut cfg = Config::default();
    cfg.search.fuzzy_threshold = 1.5;
    assert!(config::validate(&cfg).is_err());

    let mut cfg = Config::default();
    cfg.watcher.debounce_ms = 0;
    assert!(config::validate(&cfg).is_err());

    let mut cfg = Config::default();
    cfg.watcher.ignore_patterns.push("[".into());
    assert!(config::validate(&cfg).is_err());

    let mut cfg = Config::default();
    cfg.installer.extension_id = "no-publisher".into();
    assert!(config::validate(&cfg).is_err());
}

#[test]
fn missing_file_loads_defaults_with_requested_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let cfg = config::load(Some(&path)).unwrap();
    assert_eq!(cfg.config_path, path);
    assert_eq!(cfg.watcher, Config::default().watcher);
    assert!(!path.exists());
}

#[test]
fn save_then_load_keeps_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config {
        config_path: dir.path().join("nested").join("config.toml"),
        db_path: dir.path().join("gorev.db"),
        ..Config::default()
    };
    cfg.watcher.debounce_ms = 250;
    cfg.search.fuzzy_threshold = 0.75;
    cfg.ide.supported_ides = vec![Variant::Cursor];

    config::save(&cfg).unwrap();
    let loaded = config::load(Some(&cfg.config_path)).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn partial_file_fills_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "log_level = \"debug\"\n\n[watcher]\ndebounce_ms = 100\n").unwrap();

    let cfg = config::load(Some(&path)).unwrap();
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.watcher.debounce_ms, 100);
    assert_eq!(cfg.watcher.max_file_size, 10 * 1024 * 1024);
    assert_eq!(cfg.installer, Config::default().installer);
}

#[test]
fn update_check_respects_interval() {
    let mut ide = Config::default().ide;
    let now = chrono::Utc::now();
    assert!(ide.should_check_for_updates(now));

    ide.last_update_check = Some(now - chrono::Duration::hours(1));
    assert!(!ide.should_check_for_updates(now));

    ide.last_update_check = Some(now - chrono::Duration::hours(25));
    assert!(ide.should_check_for_updates(now));

    ide.auto_update = false;
    assert!(!ide.should_check_for_updates(now));
}
