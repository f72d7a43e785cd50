use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::fuzzy::similarity;
use crate::watch_backend::{BackendError, WatchBackend, WatchMode};
use crate::watch_registry::WatchRegistry;

struct NullBackend;

impl WatchBackend for NullBackend {
    fn watch(&mut self, _path: &Path, _mode: WatchMode) -> Result<(), BackendError> {
        Ok(())
    }

    fn unwatch(&mut self, _path: &Path) -> Result<(), BackendError> {
        Ok(())
    }
}

fn p95_ms(samples: &mut [f64]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let last = samples.len().saturating_sub(1);
    let idx = ((last as f64) * 0.95).round() as usize;
    samples[idx.min(last)]
}

fn median_batch_p95(batches: usize, per_batch: usize, mut run: impl FnMut()) -> (f64, Vec<f64>) {
    let mut batch_p95 = Vec::with_capacity(batches);
    for _ in 0..batches {
        let mut samples = Vec::with_capacity(per_batch);
        for _ in 0..per_batch {
            let start = Instant::now();
            run();
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        batch_p95.push(p95_ms(&mut samples));
    }
    batch_p95.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    (batch_p95[batch_p95.len() / 2], batch_p95)
}

#[test]
fn fuzzy_scan_of_1000_titles_p95_under_60ms() {
    let titles: Vec<String> = (0..1000)
        .map(|i| format!("görev {i:04} api hata düzeltmesi"))
        .collect();

    let scan = || {
        let hits = titles
            .iter()
            .filter(|title| similarity("gorev 0500 api hata duzeltmesi", title) >= 0.6)
            .count();
        assert!(hits > 0);
    };
    for _ in 0..5 {
        scan();
    }

    let (median_p95, batches) = median_batch_p95(5, 20, scan);
    assert!(
        median_p95 <= 60.0,
        "median batch p95 too high: {median_p95:.3}ms (budget 60.0ms); batches={batches:?}",
    );
}

#[test]
fn resolve_over_2000_bindings_p95_under_10ms() {
    let registry = WatchRegistry::new(Box::new(NullBackend)).with_classifier(|path| {
        path.extension().is_none()
    });
    for dir in 0..200 {
        for file in 0..10 {
            let path = PathBuf::from(format!("/work/pkg{dir:03}/file{file}.rs"));
            registry
                .bind(&format!("task-{dir}-{file}"), &path)
                .expect("bind");
        }
    }
    registry.bind("task-root", Path::new("/work/pkg100")).expect("bind dir");

    let target = PathBuf::from("/work/pkg100/file3.rs");
    for _ in 0..20 {
        let _ = registry.resolve(&target);
    }

    let (median_p95, batches) = median_batch_p95(5, 80, || {
        let tasks = registry.resolve(&target);
        assert_eq!(tasks.len(), 2);
    });
    assert!(
        median_p95 <= 10.0,
        "median batch p95 too high: {median_p95:.3}ms (budget 10.0ms); batches={batches:?}",
    );
}
