use super::*;

#[test]
fn debouncer_flushes_after_delay() {
    let mut debouncer = Debouncer::new(Duration::from_millis(100));
    let now = Instant::now();

    debouncer.record_at(now, PathBuf::from("src/a.ts"));
    assert!(debouncer.flush_ready(now + Duration::from_millis(99)).is_none());

    let flushed = debouncer.flush_ready(now + Duration::from_millis(101)).expect("should flush after delay");
    assert_eq!(flushed.len(), 1);
    assert!(flushed.contains(&PathBuf::from("src/a.ts")));
}

#[test]
fn debouncer_resets_timer_on_new_event() {
    let mut debouncer = Debouncer::new(Duration::from_millis(100));
    let now = Instant::now();

    debouncer.record_at(now, PathBuf::from("src/a.ts"));
    debouncer.record_at(now + Duration::from_millis(50), PathBuf::from("src/b.ts"));

    assert!(debouncer.flush_ready(now + Duration::from_millis(120)).is_none());

    let flushed = debouncer.flush_ready(now + Duration::from_millis(160)).expect("should flush after last event delay");
    assert_eq!(flushed.len(), 2);
}

#[test]
fn debouncer_empty_batch_flushes_nothing() {
    let mut debouncer = Debouncer::new(Duration::from_millis(100));
    assert!(debouncer.flush_ready(Instant::now()).is_none());
}

#[test]
fn watch_filter_accepts_compile_extensions_under_source_root() {
    let base = PathBuf::from("/project");
    let filter = WatchFilter::new(base.join("src"), base.join("dist"), &[]);

    assert_eq!(filter.classify(&base.join("src/App.sfc")), Some(WatchKind::Compile));
    assert_eq!(filter.classify(&base.join("src/util.ts")), Some(WatchKind::Compile));
    assert_eq!(filter.classify(&base.join("src/plain.js")), Some(WatchKind::Compile));
}

#[test]
fn watch_filter_ignores_output_dir_and_node_modules() {
    let base = PathBuf::from("/project");
    let filter = WatchFilter::new(base.join("src"), base.join("dist"), &[]);

    assert!(!filter.should_record(&base.join("dist/App.js")));
    assert!(!filter.should_record(&base.join("src/node_modules/pkg/index.ts")));
}

#[test]
fn watch_filter_ignores_unrecognised_extensions() {
    let base = PathBuf::from("/project");
    let filter = WatchFilter::new(base.join("src"), base.join("dist"), &[]);
    assert!(!filter.should_record(&base.join("src/notes.md")));
}

#[test]
fn watch_filter_matches_additional_watch_globs_as_reload_only() {
    let base = PathBuf::from("/project");
    let filter = WatchFilter::new(base.join("src"), base.join("dist"), &["**/*.css".to_string()]);
    assert_eq!(filter.classify(&base.join("styles/site.css")), Some(WatchKind::ReloadOnly));
}
