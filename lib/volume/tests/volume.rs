use std::sync::Arc;

use hfs_volume::mem::{MemClassic, MemImage, MemPlus};
use hfs_volume::{
    Backends, Capabilities, EntryKind, OpenOptions, Volume, VolumeError, VolumeFormat,
};
use pretty_assertions::assert_eq;

const IMAGE: &str = "/images/test.img";
const PLUS_IMAGE: &str = "/images/plus.dmg";

struct Fixture {
    classic: Arc<MemClassic>,
    plus: Arc<MemPlus>,
    backends: Backends,
}

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

fn fixture() -> Fixture {
    let classic = Arc::new(MemClassic::new());
    let plus = Arc::new(MemPlus::new());
    classic.insert_image(IMAGE, sample_image());
    let backends = Backends::new(classic.clone(), plus.clone());
    Fixture {
        classic,
        plus,
        backends,
    }
}

fn plus_fixture() -> Fixture {
    let f = fixture();
    let mut image = sample_image();
    let root = image.root_id();
    let link = image.add_symlink(root, "link", "/Docs/a.txt");
    image.node_mut(link).unwrap().xattrs = vec![("com.apple.FinderInfo".to_string(), 32)];
    f.plus.insert_image(PLUS_IMAGE, image);
    f
}

fn open_rw(f: &Fixture) -> Volume {
    Volume::open(IMAGE, &OpenOptions::read_write(), &f.backends).unwrap()
}

#[test]
fn classic_images_open_with_the_hfs_backend() {
    let f = fixture();
    let volume = open_rw(&f);
    assert_eq!(volume.format(), VolumeFormat::Hfs);
    assert_eq!(volume.name(), "Test");
    assert!(!volume.is_read_only());
    assert!(volume.capabilities().contains(Capabilities::WRITE));
    assert!(!volume.capabilities().contains(Capabilities::SYMLINKS));
    assert_eq!(volume.root().id(), 2);
    assert!(volume.root().is_directory());
}

#[test]
fn read_only_is_the_default_mode() {
    let f = fixture();
    let volume = Volume::open(IMAGE, &OpenOptions::default(), &f.backends).unwrap();
    assert!(volume.is_read_only());
    assert!(volume.open_warning().is_none());

    let err = volume.create_directory(":New").unwrap_err();
    assert!(matches!(err, VolumeError::ReadOnly));
    assert!(!err.is_retryable());
}

#[test]
fn write_protected_images_fall_back_to_read_only() {
    let f = fixture();
    f.classic.insert_image("/images/locked.img", sample_image().write_protected());
    let volume =
        Volume::open("/images/locked.img", &OpenOptions::read_write(), &f.backends).unwrap();
    assert!(volume.is_read_only());
    let warning = volume.open_warning().unwrap();
    assert!(warning.contains("permission denied"), "{warning}");
    assert_eq!(f.classic.calls("mount"), 2);
}

#[test]
fn unknown_files_are_not_hfs_volumes() {
    let f = fixture();
    let err = Volume::open("/images/random.bin", &OpenOptions::default(), &f.backends).unwrap_err();
    assert!(matches!(err, VolumeError::NotHfsVolume { ref path } if path == "/images/random.bin"));
}

#[test]
fn a_broken_hfs_plus_volume_reports_the_plus_error() {
    let f = plus_fixture();
    f.plus.fail_next("open_volume", "corrupt catalog");
    let err = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap_err();
    assert!(matches!(err, VolumeError::Open { ref reason, .. } if reason == "corrupt catalog"));
}

#[test]
fn listed_entries_round_trip_through_lookup() {
    let f = fixture();
    let volume = open_rw(&f);
    let docs = volume
        .list_children(&volume.root())
        .unwrap()
        .into_iter()
        .find(|e| e.name() == "Docs")
        .unwrap();
    let children = volume.list_children(&docs).unwrap();
    let names: Vec<_> = children.iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "Nested"]);

    let a = &children[0];
    assert_eq!(a.classic_path().as_deref(), Some(":Docs:a.txt"));
    assert_eq!(a.parent_id(), docs.id());
    let looked_up = volume.lookup(":Docs:a.txt").unwrap();
    assert_eq!(looked_up.id(), a.id());
    assert_eq!(looked_up.data_size(), 5);
}

#[test]
fn missing_paths_are_not_found() {
    let f = fixture();
    let volume = open_rw(&f);
    let err = volume.lookup(":Docs:missing").unwrap_err();
    assert!(matches!(err, VolumeError::NotFound(ref p) if p == ":Docs:missing"));
}

#[test]
fn listing_a_file_is_an_error() {
    let f = fixture();
    let volume = open_rw(&f);
    let file = volume.lookup(":Docs:a.txt").unwrap();
    assert!(matches!(
        volume.list_children(&file),
        Err(VolumeError::Operation { .. })
    ));
}

#[test]
fn directory_handles_are_closed_after_listing() {
    let f = fixture();
    let volume = open_rw(&f);
    volume.list_children(&volume.root()).unwrap();
    volume.lookup(":Docs:a.txt").unwrap().read_preview().unwrap();
    assert_eq!(f.classic.open_handles(), 0);
}

#[test]
fn reads_are_capped_by_the_limit() {
    let f = fixture();
    let volume = open_rw(&f);
    let b = volume.lookup(":Docs:b.txt").unwrap();
    assert_eq!(b.read_data(6).unwrap(), b"second");
    assert_eq!(b.read_preview().unwrap(), b"second file");

    let empty = volume.lookup(":empty").unwrap();
    assert!(empty.read_preview().unwrap().is_empty());

    let docs = volume.lookup(":Docs").unwrap();
    assert!(matches!(docs.read_preview(), Err(VolumeError::Operation { .. })));
}

#[test]
fn renaming_keeps_the_catalog_id() {
    let f = fixture();
    let volume = open_rw(&f);
    let a = volume.lookup(":Docs:a.txt").unwrap();
    let renamed = a.rename("c.txt").unwrap();

    assert_eq!(renamed.id(), a.id());
    assert_eq!(renamed.name(), "c.txt");
    assert_eq!(a.classic_path().as_deref(), Some(":Docs:c.txt"));
    assert_eq!(volume.lookup(":Docs:c.txt").unwrap().id(), a.id());
    assert!(matches!(volume.lookup(":Docs:a.txt"), Err(VolumeError::NotFound(_))));
    // the old handle still reads the right file
    assert_eq!(a.read_preview().unwrap(), b"hello");
}

#[test]
fn invalid_names_are_rejected_before_any_native_call() {
    let f = fixture();
    let volume = open_rw(&f);
    let a = volume.lookup(":Docs:a.txt").unwrap();
    f.classic.reset_calls();

    assert!(matches!(a.rename("x:y"), Err(VolumeError::InvalidName { .. })));
    assert!(matches!(a.rename(""), Err(VolumeError::InvalidName { .. })));
    let long = "n".repeat(32);
    assert!(matches!(a.rename(&long), Err(VolumeError::InvalidName { .. })));
    assert_eq!(f.classic.calls("rename"), 0);
}

#[test]
fn deleted_entries_disappear_from_listings() {
    let f = fixture();
    let volume = open_rw(&f);
    let docs = volume.lookup(":Docs").unwrap();
    let b = volume.lookup(":Docs:b.txt").unwrap();
    b.delete().unwrap();

    let ids: Vec<_> = volume.list_children(&docs).unwrap().iter().map(|e| e.id()).collect();
    assert!(!ids.contains(&b.id()));
    assert_eq!(ids.len(), 2);
}

#[test]
fn deleting_a_directory_removes_its_contents() {
    let f = fixture();
    let volume = open_rw(&f);
    volume.lookup(":Docs").unwrap().delete().unwrap();
    let names: Vec<_> = volume
        .list_children(&volume.root())
        .unwrap()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, ["empty"]);
    assert_eq!(f.classic.image(IMAGE).unwrap().used_bytes(), 0);
}

#[test]
fn the_root_cannot_be_deleted() {
    let f = fixture();
    let volume = open_rw(&f);
    assert!(matches!(
        volume.root().delete(),
        Err(VolumeError::Operation { .. })
    ));
}

#[test]
fn creating_an_existing_directory_collides() {
    let f = fixture();
    let volume = open_rw(&f);
    let created = volume.create_directory(":Fresh").unwrap();
    assert!(created.is_directory());
    assert_eq!(created.name(), "Fresh");

    let err = volume.create_directory(":Docs").unwrap_err();
    assert!(matches!(err, VolumeError::AlreadyExists { ref path } if path == ":Docs"));
}

#[test]
fn imports_are_written_in_fixed_chunks() {
    let f = fixture();
    let volume = open_rw(&f);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("big.bin");
    let data: Vec<u8> = (0..102_400u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &data).unwrap();
    f.classic.reset_calls();

    let imported = volume.import_file(&source, ":Docs:big.bin").unwrap();
    assert_eq!(f.classic.calls("write"), 4);
    assert_eq!(imported.data_size(), 102_400);
    assert_eq!(imported.finder_info().unwrap().type_code(), "????");
    assert_eq!(imported.read_preview().unwrap(), data);
}

#[test]
fn host_directories_are_imported_recursively() {
    let f = fixture();
    let volume = open_rw(&f);
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("Project");
    std::fs::create_dir_all(tree.join("src")).unwrap();
    std::fs::write(tree.join("README.txt"), "read me").unwrap();
    std::fs::write(tree.join("src").join("main.rs"), "fn main() {}").unwrap();

    let imported = volume.import_file(&tree, ":Project").unwrap();
    assert!(imported.is_directory());
    let readme = volume.lookup(":Project:README.txt").unwrap();
    assert_eq!(readme.finder_info().unwrap().type_code(), "TEXT");
    assert_eq!(
        volume.lookup(":Project:src:main.rs").unwrap().read_preview().unwrap(),
        b"fn main() {}"
    );
}

#[test]
fn a_failed_import_leaves_no_partial_file() {
    let f = fixture();
    let volume = open_rw(&f);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("data.bin");
    std::fs::write(&source, vec![7u8; 1000]).unwrap();

    f.classic.set_write_limit(Some(0));
    let err = volume.import_file(&source, ":data.bin").unwrap_err();
    assert!(matches!(err, VolumeError::WriteFailed { .. }));
    assert!(matches!(volume.lookup(":data.bin"), Err(VolumeError::NotFound(_))));
}

#[test]
fn full_volumes_report_insufficient_space() {
    let f = fixture();
    f.classic
        .insert_image("/images/tiny.img", MemImage::new("Tiny").with_capacity(100));
    let volume =
        Volume::open("/images/tiny.img", &OpenOptions::read_write(), &f.backends).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("big.bin");
    std::fs::write(&source, vec![1u8; 500]).unwrap();

    let err = volume.import_file(&source, ":big.bin").unwrap_err();
    assert!(matches!(err, VolumeError::InsufficientSpace { .. }), "{err:?}");
}

#[test]
fn duplicates_get_numbered_copy_names() {
    let f = fixture();
    let volume = open_rw(&f);
    let a = volume.lookup(":Docs:a.txt").unwrap();

    let first = volume.duplicate(&a).unwrap();
    let second = volume.duplicate(&a).unwrap();
    assert_eq!(first.name(), "a copy.txt");
    assert_eq!(second.name(), "a copy 2.txt");
    assert_ne!(first.id(), a.id());
    assert_eq!(second.read_preview().unwrap(), b"hello");
}

#[test]
fn directories_copy_recursively_but_not_into_themselves() {
    let f = fixture();
    let volume = open_rw(&f);
    let docs = volume.lookup(":Docs").unwrap();

    let copy = docs.copy_to(":Archive").unwrap();
    assert!(copy.is_directory());
    assert_eq!(
        volume.lookup(":Archive:Nested:deep.txt").unwrap().read_preview().unwrap(),
        b"deep"
    );

    let err = docs.copy_to(":Docs:Inner").unwrap_err();
    assert!(matches!(err, VolumeError::Operation { .. }));
    let err = docs.copy_to(":Archive").unwrap_err();
    assert!(matches!(err, VolumeError::AlreadyExists { .. }));
}

#[test]
fn moved_directories_keep_their_id_and_children() {
    let f = fixture();
    let volume = open_rw(&f);
    let nested = volume.lookup(":Docs:Nested").unwrap();
    let moved = nested.move_to(":Nested").unwrap();

    assert_eq!(moved.id(), nested.id());
    assert_eq!(nested.classic_path().as_deref(), Some(":Nested"));
    let children = volume.list_children(&nested).unwrap();
    assert_eq!(children[0].name(), "deep.txt");
}

#[test]
fn exports_write_host_files() {
    let f = fixture();
    let volume = open_rw(&f);
    let out = tempfile::tempdir().unwrap();

    let docs = volume.lookup(":Docs").unwrap();
    let target = volume.export(&docs, out.path()).unwrap();
    assert_eq!(target, out.path().join("Docs"));
    assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"hello");
    assert_eq!(
        std::fs::read(target.join("Nested").join("deep.txt")).unwrap(),
        b"deep"
    );
}

#[test]
fn entries_from_another_session_are_refused() {
    let f = fixture();
    let first = open_rw(&f);
    let second = Volume::open(IMAGE, &OpenOptions::default(), &f.backends).unwrap();
    let a = first.lookup(":Docs:a.txt").unwrap();

    let err = second.read_data(&a, 10).unwrap_err();
    assert!(matches!(err, VolumeError::ForeignEntry { .. }));
    assert!(!first.same_session(&second));
}

#[test]
fn closing_ends_the_session() {
    let f = fixture();
    let volume = open_rw(&f);
    let root = volume.root();
    volume.close();
    volume.close();

    assert!(!volume.is_open());
    assert_eq!(f.classic.mounted_volumes(), 0);
    assert!(matches!(volume.list_children(&root), Err(VolumeError::Closed)));
}

#[test]
fn plus_volumes_are_read_only_by_construction() {
    let f = plus_fixture();
    let volume = Volume::open(PLUS_IMAGE, &OpenOptions::read_write(), &f.backends).unwrap();
    assert_eq!(volume.format(), VolumeFormat::HfsPlus);
    assert!(volume.is_read_only());
    assert!(!volume.capabilities().contains(Capabilities::WRITE));
    assert_eq!(volume.open_warning(), Some("HFS+ volumes are opened read-only"));
    assert_eq!(f.classic.calls("mount"), 0);

    let a = volume.lookup("/Docs/a.txt").unwrap();
    assert!(matches!(
        a.delete(),
        Err(VolumeError::Unsupported { backend: "HFS+", .. })
    ));
    assert!(matches!(
        volume.create_directory(":New"),
        Err(VolumeError::Unsupported { .. })
    ));
    assert!(matches!(
        volume.ensure_writable("rename"),
        Err(VolumeError::Unsupported { operation: "rename", .. })
    ));
}

#[test]
fn plus_entries_expose_posix_metadata() {
    let f = plus_fixture();
    let volume = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap();
    let link = volume.lookup("/link").unwrap();
    assert_eq!(link.kind(), EntryKind::Symlink);
    assert_eq!(link.symlink_target().unwrap().as_deref(), Some("/Docs/a.txt"));
    assert_eq!(link.permissions(), 0o755);

    let attrs = volume.extended_attributes(&link).unwrap();
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].name, "com.apple.FinderInfo");

    let a = volume.lookup("/Docs/a.txt").unwrap();
    assert_eq!(a.kind(), EntryKind::File);
    assert_eq!(a.read_preview().unwrap(), b"hello");
    assert_eq!(volume.resource_fork_size(&a).unwrap(), None);
}

#[test]
fn plus_handles_are_released_exactly_once() {
    let f = plus_fixture();
    {
        let volume = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap();
        let children = volume.list_children(&volume.root()).unwrap();
        let docs = children.iter().find(|e| e.name() == "Docs").unwrap();
        let inner = volume.list_children(docs).unwrap();
        assert_eq!(inner.len(), 3);
        inner[0].read_preview().unwrap();
        volume.close();
        assert!(!volume.is_open());
        // listed entries still pin the native volume
        assert_eq!(f.plus.open_volumes(), 1);
    }
    assert_eq!(f.plus.open_volumes(), 0);
    assert_eq!(f.plus.outstanding_entries(), 0);
    assert_eq!(f.plus.invalid_frees(), 0);
    assert_eq!(f.plus.frees_after_close(), 0);
}

#[test]
fn entries_outliving_a_closed_volume_are_freed_first() {
    let f = plus_fixture();
    let volume = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap();
    let children = volume.list_children(&volume.root()).unwrap();
    volume.close();
    drop(volume);
    assert_eq!(f.plus.open_volumes(), 1);
    assert!(matches!(children[0].read_preview(), Err(VolumeError::Closed)));

    drop(children);
    assert_eq!(f.plus.open_volumes(), 0);
    assert_eq!(f.plus.outstanding_entries(), 0);
    assert_eq!(f.plus.frees_after_close(), 0);
}

#[test]
fn plus_library_setup_failures_are_initialization_errors() {
    let f = plus_fixture();
    f.plus.fail_next_initialization("unable to allocate volume");
    let err = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap_err();
    assert!(matches!(
        &err,
        VolumeError::Initialization { backend: "HFS+", reason } if reason == "unable to allocate volume"
    ));
    assert_eq!(
        err.to_string(),
        "unable to initialize the HFS+ library: unable to allocate volume"
    );
    // the classic library is not tried
    assert_eq!(f.classic.calls("mount"), 0);
}

#[test]
fn a_failing_getter_still_frees_the_entry() {
    let f = plus_fixture();
    let volume = Volume::open(PLUS_IMAGE, &OpenOptions::default(), &f.backends).unwrap();
    let root = volume.root();
    f.plus.fail_next("name", "damaged record");
    let err = volume.list_children(&root).unwrap_err();
    assert!(matches!(err, VolumeError::Operation { operation: "plus.name", .. }));
    drop(root);
    drop(volume);
    assert_eq!(f.plus.outstanding_entries(), 0);
}
