use std::sync::Arc;

use hfs_volume::mem::{MemClassic, MemImage, MemPlus};
use hfs_volume::{
    Backends, Entry, ListingOptions, MemoryPreferences, NavigationOutcome, Navigator,
    NavigatorConfig, OpenOptions, PreferenceStore, Preferences, RequestOutcome, SortOrder, Update,
    VolumeError, WriteOperation,
};
use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

const IMAGE: &str = "/images/test.img";
const DEVICE: &str = "/dev/rdisk4";

fn sample_image() -> MemImage {
    let mut image = MemImage::new("Test");
    let root = image.root_id();
    let docs = image.add_dir(root, "Docs");
    image.add_file(docs, "a.txt", b"hello".to_vec());
    image.add_file(docs, "b.txt", b"second file".to_vec());
    let nested = image.add_dir(docs, "Nested");
    image.add_file(nested, "deep.txt", b"deep".to_vec());
    image.add_file(root, "empty", Vec::new());
    image
}

struct Harness {
    classic: Arc<MemClassic>,
    prefs: MemoryPreferences,
    nav: Navigator,
}

fn harness(prefs: Preferences) -> Harness {
    let classic = Arc::new(MemClassic::new());
    classic.insert_image(IMAGE, sample_image());
    classic.insert_image(DEVICE, sample_image());
    classic.insert_image("/images/other.img", MemImage::new("Other"));
    let backends = Backends::new(classic.clone(), Arc::new(MemPlus::new()));
    let prefs = MemoryPreferences::new(prefs);
    let nav = Navigator::new(
        Handle::current(),
        backends,
        Box::new(prefs.clone()),
        NavigatorConfig::default(),
    );
    Harness {
        classic,
        prefs,
        nav,
    }
}

async fn opened(path: &str, options: OpenOptions) -> Harness {
    let mut h = harness(Preferences::default());
    h.nav.open(path, options);
    h.nav.settle().await;
    assert!(h.nav.volume().is_some(), "{:?}", h.nav.last_error());
    h
}

fn child(nav: &Navigator, name: &str) -> Entry {
    nav.contents()
        .iter()
        .find(|e| e.name() == name)
        .cloned()
        .unwrap_or_else(|| panic!("{name} is not listed"))
}

async fn enter(h: &mut Harness, name: &str) -> Entry {
    let dir = child(&h.nav, name);
    h.nav.navigate(&dir).unwrap();
    h.nav.settle().await;
    dir
}

#[tokio::test]
async fn opening_lists_the_root() {
    let mut h = harness(Preferences::default());
    h.nav.open(IMAGE, OpenOptions::default());
    assert!(h.nav.is_loading());

    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::Opened(_)));
    assert!(matches!(updates[1], Update::Listed { dir: 2, count: 2 }));
    assert!(!h.nav.is_loading());
    assert_eq!(h.nav.stack().len(), 1);
    assert_eq!(h.nav.current().unwrap().id(), 2);
    assert!(h.nav.is_cached(2));
}

#[tokio::test]
async fn failed_opens_are_reported() {
    let mut h = harness(Preferences::default());
    h.nav.open("/images/missing.img", OpenOptions::default());
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::OpenFailed(VolumeError::NotHfsVolume { .. })));
    assert!(h.nav.volume().is_none());
    assert!(h.nav.last_error().unwrap().contains("missing.img"));
}

#[tokio::test]
async fn cached_directories_need_no_native_calls() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    let root = h.nav.current().unwrap().clone();
    let docs = child(&h.nav, "Docs");
    assert_eq!(h.nav.navigate(&docs).unwrap(), NavigationOutcome::Loading);
    h.nav.settle().await;
    assert_eq!(h.nav.contents().len(), 3);

    h.classic.reset_calls();
    assert_eq!(h.nav.navigate(&root).unwrap(), NavigationOutcome::Cached);
    assert_eq!(h.nav.stack().len(), 1);
    assert_eq!(h.nav.navigate(&docs).unwrap(), NavigationOutcome::Cached);
    assert!(h.nav.settle().await.is_empty());
    assert_eq!(h.classic.total_calls(), 0);
    assert_eq!(h.nav.contents().len(), 3);
}

#[tokio::test]
async fn navigating_to_a_stack_entry_truncates_above_it() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    enter(&mut h, "Docs").await;
    enter(&mut h, "Nested").await;
    assert_eq!(h.nav.stack().len(), 3);

    assert_eq!(h.nav.navigate_up().unwrap(), Some(NavigationOutcome::Cached));
    let names: Vec<_> = h.nav.stack().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["", "Docs"]);
    h.nav.navigate_up().unwrap();
    assert_eq!(h.nav.navigate_up().unwrap(), None);
}

#[tokio::test]
async fn selecting_a_file_does_not_list() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    let empty = child(&h.nav, "empty");
    h.classic.reset_calls();
    assert_eq!(h.nav.navigate(&empty).unwrap(), NavigationOutcome::Selected);
    assert_eq!(h.nav.selection().unwrap().id(), empty.id());
    assert_eq!(h.nav.stack().len(), 1);
    assert_eq!(h.classic.total_calls(), 0);
}

#[tokio::test]
async fn results_for_a_closed_volume_are_discarded() {
    let mut h = harness(Preferences::default());
    h.nav.open(IMAGE, OpenOptions::default());
    h.nav.open("/images/other.img", OpenOptions::default());

    let updates = h.nav.settle().await;
    assert_eq!(
        updates.iter().filter(|u| matches!(u, Update::Discarded)).count(),
        1
    );
    assert_eq!(h.nav.volume().unwrap().path(), "/images/other.img");
    assert_eq!(h.classic.mounted_volumes(), 1);
}

#[tokio::test]
async fn closing_clears_navigation_state() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    enter(&mut h, "Docs").await;
    h.nav.close();
    assert!(h.nav.volume().is_none());
    assert!(h.nav.stack().is_empty());
    assert!(h.nav.contents().is_empty());
    assert!(!h.nav.is_cached(2));
    assert_eq!(h.classic.mounted_volumes(), 0);
    assert!(matches!(h.nav.refresh(), Err(VolumeError::Closed)));
}

#[tokio::test]
async fn entries_from_another_volume_are_refused() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    let docs = child(&h.nav, "Docs");
    let _previous = h.nav.volume().unwrap().clone();
    h.nav.open(IMAGE, OpenOptions::default());
    h.nav.settle().await;
    assert!(matches!(
        h.nav.navigate(&docs),
        Err(VolumeError::ForeignEntry { .. })
    ));
}

#[tokio::test]
async fn image_files_write_without_confirmation() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = enter(&mut h, "Docs").await;
    let b = child(&h.nav, "b.txt");

    let outcome = h.nav.request(WriteOperation::Delete { entry: b.clone() }).unwrap();
    assert_eq!(outcome, RequestOutcome::Started);
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::Mutated { operation: "delete", .. }));
    assert!(matches!(updates[1], Update::Listed { count: 2, .. }));

    assert_eq!(h.nav.current().unwrap().id(), docs.id());
    assert!(h.nav.contents().iter().all(|e| e.id() != b.id()));
}

#[tokio::test]
async fn device_writes_wait_for_confirmation() {
    let mut h = opened(DEVICE, OpenOptions::read_write()).await;
    let root = h.nav.current().unwrap().clone();

    let outcome = h
        .nav
        .request(WriteOperation::CreateFolder {
            parent: root.clone(),
            name: "New".to_string(),
        })
        .unwrap();
    let RequestOutcome::NeedsConfirmation(id) = outcome else {
        panic!("expected a confirmation, got {outcome:?}");
    };
    let pending = h.nav.pending_confirmation().unwrap();
    assert_eq!(
        pending.message(),
        "\"/dev/rdisk4\" is a physical device. Are you sure you want to create folder \"New\"?"
    );
    assert!(h.nav.settle().await.is_empty());
    assert_eq!(h.classic.calls("mkdir"), 0);

    h.nav.confirm(id, false).unwrap();
    h.nav.settle().await;
    assert_eq!(h.classic.calls("mkdir"), 1);
    assert!(h.nav.contents().iter().any(|e| e.name() == "New"));
    assert!(!h.prefs.load().suppress_device_write_warnings);
}

#[tokio::test]
async fn suppressing_device_warnings_is_remembered() {
    let mut h = opened(DEVICE, OpenOptions::read_write()).await;
    let root = h.nav.current().unwrap().clone();
    let folder = |name: &str| WriteOperation::CreateFolder {
        parent: root.clone(),
        name: name.to_string(),
    };

    let RequestOutcome::NeedsConfirmation(id) = h.nav.request(folder("One")).unwrap() else {
        panic!("expected a confirmation");
    };
    h.nav.confirm(id, true).unwrap();
    h.nav.settle().await;
    assert!(h.prefs.load().suppress_device_write_warnings);

    assert_eq!(h.nav.request(folder("Two")).unwrap(), RequestOutcome::Started);
    h.nav.settle().await;
    assert_eq!(h.classic.calls("mkdir"), 2);
}

#[tokio::test]
async fn stored_preferences_skip_the_device_gate() {
    let mut h = harness(Preferences {
        suppress_device_write_warnings: true,
        ..Preferences::default()
    });
    h.nav.open(DEVICE, OpenOptions::read_write());
    h.nav.settle().await;
    let root = h.nav.current().unwrap().clone();
    let outcome = h
        .nav
        .request(WriteOperation::CreateFolder {
            parent: root,
            name: "New".to_string(),
        })
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Started);
}

#[tokio::test]
async fn cancelled_operations_never_run() {
    let mut h = opened(DEVICE, OpenOptions::read_write()).await;
    let empty = child(&h.nav, "empty");
    let RequestOutcome::NeedsConfirmation(id) = h
        .nav
        .request(WriteOperation::Delete { entry: empty })
        .unwrap()
    else {
        panic!("expected a confirmation");
    };
    assert!(h.nav.cancel(id));
    assert!(h.nav.pending_confirmation().is_none());
    assert!(matches!(h.nav.confirm(id, false), Err(VolumeError::Cancelled)));
    assert_eq!(h.classic.calls("delete"), 0);
}

#[tokio::test]
async fn read_only_volumes_refuse_before_the_gate() {
    let mut h = opened(DEVICE, OpenOptions::default()).await;
    let empty = child(&h.nav, "empty");
    let err = h.nav.request(WriteOperation::Delete { entry: empty }).unwrap_err();
    assert!(matches!(err, VolumeError::ReadOnly));
    assert!(h.nav.pending_confirmation().is_none());
}

#[tokio::test]
async fn failed_mutations_keep_the_error() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = child(&h.nav, "Docs");
    let outcome = h
        .nav
        .request(WriteOperation::Rename {
            entry: docs,
            new_name: "empty".to_string(),
        })
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Started);
    let updates = h.nav.settle().await;
    assert!(updates.iter().any(|u| matches!(
        u,
        Update::MutationFailed {
            error: VolumeError::AlreadyExists { .. },
            ..
        }
    )));
    assert!(h.nav.last_error().is_some());
}

#[tokio::test]
async fn renaming_the_current_directory_keeps_it_current() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = enter(&mut h, "Docs").await;
    enter(&mut h, "Nested").await;

    h.nav
        .request(WriteOperation::Rename {
            entry: docs.clone(),
            new_name: "Papers".to_string(),
        })
        .unwrap();
    h.nav.settle().await;

    assert_eq!(h.nav.current().unwrap().id(), docs.id());
    assert_eq!(h.nav.stack().len(), 2);
    let names: Vec<_> = h.nav.contents().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "Nested"]);
    // paths cached below the old name are gone
    assert!(!h.nav.is_cached(2));
}

#[tokio::test]
async fn deleting_the_current_directory_steps_out() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = enter(&mut h, "Docs").await;
    h.nav.request(WriteOperation::Delete { entry: docs }).unwrap();
    h.nav.settle().await;

    assert_eq!(h.nav.current().unwrap().id(), 2);
    let names: Vec<_> = h.nav.contents().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["empty"]);
}

#[tokio::test]
async fn imports_refresh_the_destination() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = enter(&mut h, "Docs").await;
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, "imported").unwrap();

    h.nav
        .request(WriteOperation::Import {
            sources: vec![source],
            destination: docs,
        })
        .unwrap();
    let updates = h.nav.settle().await;
    let Update::Mutated { entries, .. } = &updates[0] else {
        panic!("expected a mutation, got {updates:?}");
    };
    assert_eq!(entries[0].name(), "notes.txt");
    assert!(h.nav.contents().iter().any(|e| e.name() == "notes.txt"));
}

#[tokio::test]
async fn searches_walk_the_tree() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    h.nav.search("TXT").unwrap();
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::SearchFinished { matches: 3, .. }));
    let names: Vec<_> = h
        .nav
        .search_results()
        .unwrap()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, ["a.txt", "b.txt", "deep.txt"]);

    h.nav.clear_search();
    assert!(h.nav.search_results().is_none());
}

#[tokio::test]
async fn preloading_fills_the_cache() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    h.nav.preload_children().unwrap();
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::Preloaded { directories: 1 }));

    let docs = child(&h.nav, "Docs");
    assert!(h.nav.is_cached(docs.id()));
    assert_eq!(h.nav.navigate(&docs).unwrap(), NavigationOutcome::Cached);
}

#[tokio::test]
async fn previews_hold_the_file_start() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    enter(&mut h, "Docs").await;
    let a = child(&h.nav, "a.txt");
    h.nav.load_preview(&a).unwrap();
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::PreviewReady(id) if id == a.id()));
    assert_eq!(h.nav.preview().unwrap().data, b"hello");

    let nested = child(&h.nav, "Nested");
    h.nav.load_preview(&nested).unwrap();
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::PreviewUnavailable(_)));
}

#[tokio::test]
async fn exports_report_the_written_paths() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    enter(&mut h, "Docs").await;
    let out = tempfile::tempdir().unwrap();
    let entries = vec![child(&h.nav, "a.txt"), child(&h.nav, "Nested")];
    h.nav.export(entries, out.path().to_path_buf()).unwrap();

    let updates = h.nav.settle().await;
    let Update::Exported(paths) = &updates[0] else {
        panic!("expected an export, got {updates:?}");
    };
    assert_eq!(paths.len(), 2);
    assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), b"hello");
    assert!(out.path().join("Nested").join("deep.txt").is_file());
}

#[tokio::test]
async fn listing_options_are_applied_and_saved() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    enter(&mut h, "Docs").await;
    h.nav.set_listing_options(ListingOptions {
        sort_order: SortOrder::Descending,
        ..ListingOptions::default()
    });

    let names: Vec<_> = h
        .nav
        .visible_entries()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, ["Nested", "b.txt", "a.txt"]);
    assert_eq!(h.prefs.load().sort_order, SortOrder::Descending);

    let raw: Vec<_> = h.nav.contents().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(raw, ["a.txt", "b.txt", "Nested"]);
}

#[tokio::test]
async fn renaming_through_a_separately_listed_entry_updates_the_stack() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    enter(&mut h, "Docs").await;
    enter(&mut h, "Nested").await;
    h.nav.navigate_up().unwrap();

    let root = h.nav.stack()[0].clone();
    let fresh = h
        .nav
        .volume()
        .unwrap()
        .list_children(&root)
        .unwrap()
        .into_iter()
        .find(|e| e.name() == "Docs")
        .unwrap();
    h.nav
        .request(WriteOperation::Rename {
            entry: fresh,
            new_name: "Papers".to_string(),
        })
        .unwrap();
    let updates = h.nav.settle().await;

    assert!(
        !updates.iter().any(|u| matches!(u, Update::ListFailed { .. })),
        "{updates:?}"
    );
    assert!(h.nav.last_error().is_none());
    let current = h.nav.current().unwrap();
    assert_eq!(current.name(), "Papers");
    assert_eq!(current.classic_path().as_deref(), Some(":Papers"));
    assert_eq!(h.nav.stack()[1].name(), "Papers");
    assert_eq!(h.nav.contents().len(), 3);
}

#[tokio::test]
async fn failed_deletes_leave_the_stack_alone() {
    let mut h = opened(IMAGE, OpenOptions::read_write()).await;
    let docs = enter(&mut h, "Docs").await;
    h.classic.fail_next("delete", "file is locked");

    h.nav.request(WriteOperation::Delete { entry: docs.clone() }).unwrap();
    let updates = h.nav.settle().await;

    assert!(updates.iter().any(|u| matches!(
        u,
        Update::MutationFailed {
            operation: "delete",
            ..
        }
    )));
    assert_eq!(h.nav.current().unwrap().id(), docs.id());
    assert_eq!(h.nav.stack().len(), 2);
    assert!(h.nav.volume().unwrap().lookup(":Docs").is_ok());
}

#[tokio::test]
async fn listing_failures_are_reported_and_not_cached() {
    let mut h = opened(IMAGE, OpenOptions::default()).await;
    let docs = child(&h.nav, "Docs");
    h.classic.fail_next("opendir", "disk error");

    assert_eq!(h.nav.navigate(&docs).unwrap(), NavigationOutcome::Loading);
    let updates = h.nav.settle().await;
    assert!(matches!(
        &updates[0],
        Update::ListFailed { dir, .. } if *dir == docs.id()
    ));
    assert!(h.nav.last_error().unwrap().contains("disk error"));
    assert!(!h.nav.is_cached(docs.id()));
    assert!(!h.nav.is_loading());
    assert!(h.nav.contents().is_empty());

    h.nav.refresh().unwrap();
    let updates = h.nav.settle().await;
    assert!(matches!(updates[0], Update::Listed { count: 3, .. }));
    assert!(h.nav.is_cached(docs.id()));
}

#[tokio::test]
async fn closing_frees_plus_entries_before_the_volume() {
    const PLUS_IMAGE: &str = "/images/plus.dmg";
    let plus = Arc::new(MemPlus::new());
    plus.insert_image(PLUS_IMAGE, sample_image());
    let backends = Backends::new(Arc::new(MemClassic::new()), plus.clone());
    let mut nav = Navigator::new(
        Handle::current(),
        backends,
        Box::new(MemoryPreferences::default()),
        NavigatorConfig::default(),
    );
    nav.open(PLUS_IMAGE, OpenOptions::default());
    nav.settle().await;
    let docs = child(&nav, "Docs");
    nav.navigate(&docs).unwrap();
    nav.settle().await;
    drop(docs);
    assert!(plus.outstanding_entries() > 0);

    nav.close();
    assert_eq!(plus.open_volumes(), 0);
    assert_eq!(plus.outstanding_entries(), 0);
    assert_eq!(plus.frees_after_close(), 0);
    assert_eq!(plus.invalid_frees(), 0);
}
