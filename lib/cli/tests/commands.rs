use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hfs_cli::cli::HfsView;
use hfs_cli::commands::Context;
use hfs_volume::mem::{MemClassic, MemImage, MemPlus};
use hfs_volume::{Backends, MemoryPreferences, PreferenceStore, Preferences, VolumeError};
use pretty_assertions::assert_eq;

const IMAGE: &str = "/images/test.img";
const DEVICE: &str = "/dev/rdisk4";
const PLUS_IMAGE: &str = "/images/plus.dmg";

struct Harness {
    classic: Arc<MemClassic>,
    backends: Backends,
    prefs: MemoryPreferences,
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

fn harness() -> Harness {
    let classic = Arc::new(MemClassic::new());
    let plus = Arc::new(MemPlus::new());
    classic.insert_image(IMAGE, sample_image());
    classic.insert_image(DEVICE, sample_image());
    plus.insert_image(PLUS_IMAGE, sample_image());
    Harness {
        backends: Backends::new(classic.clone(), plus),
        classic,
        prefs: MemoryPreferences::default(),
    }
}

impl Harness {
    fn run(&self, args: &[&str]) -> Result<String> {
        let options = HfsView::try_parse_from(std::iter::once("hfsview").chain(args.iter().copied()))?;
        let mut out = Vec::new();
        {
            let mut ctx = Context {
                backends: self.backends.clone(),
                prefs: Box::new(self.prefs.clone()),
                out: &mut out,
            };
            options.execute(&mut ctx)?;
        }
        Ok(String::from_utf8(out)?)
    }
}

fn lines(output: &str) -> Vec<&str> {
    output.lines().collect()
}

#[test]
fn ls_puts_folders_first() {
    let h = harness();
    let output = h.run(&["ls", IMAGE]).unwrap();
    assert_eq!(lines(&output), ["Docs/", "empty"]);
}

#[test]
fn ls_sorts_by_size_in_reverse() {
    let h = harness();
    let output = h
        .run(&["ls", IMAGE, "/Docs", "--sort", "size", "--reverse"])
        .unwrap();
    assert_eq!(lines(&output), ["Nested/", "b.txt", "a.txt"]);
}

#[test]
fn ls_filters_by_name() {
    let h = harness();
    let output = h.run(&["ls", IMAGE, "/Docs", "--filter", "B."]).unwrap();
    assert_eq!(lines(&output), ["b.txt"]);
}

#[test]
fn ls_long_shows_sizes_and_codes() {
    let h = harness();
    let output = h.run(&["ls", IMAGE, "/Docs", "-l"]).unwrap();
    let rows = lines(&output);
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with('d'));
    assert!(rows[1].starts_with('-'));
    assert!(rows[1].contains("5 B"));
    assert!(rows[1].ends_with("a.txt"));
}

#[test]
fn ls_of_a_file_is_refused() {
    let h = harness();
    let err = h.run(&["ls", IMAGE, "/Docs/a.txt"]).unwrap_err();
    assert!(err.to_string().contains("is not a directory"));
}

#[test]
fn missing_paths_name_the_volume() {
    let h = harness();
    let err = h.run(&["cat", IMAGE, "/Docs/missing"]).unwrap_err();
    assert_eq!(err.to_string(), "`/Docs/missing` was not found on \"Test\"");
    assert!(matches!(
        err.downcast_ref::<VolumeError>(),
        Some(VolumeError::NotFound(_))
    ));
}

#[test]
fn cat_prints_the_data_fork() {
    let h = harness();
    assert_eq!(h.run(&["cat", IMAGE, "/Docs/a.txt"]).unwrap(), "hello");
    assert_eq!(
        h.run(&["cat", IMAGE, "/Docs/b.txt", "--limit", "6"]).unwrap(),
        "second"
    );
}

#[test]
fn colon_paths_work_on_classic_volumes() {
    let h = harness();
    assert_eq!(h.run(&["cat", IMAGE, ":Docs:Nested:deep.txt"]).unwrap(), "deep");
}

#[test]
fn tree_walks_every_level() {
    let h = harness();
    let output = h.run(&["tree", IMAGE]).unwrap();
    assert_eq!(
        lines(&output),
        [
            "/",
            "  Docs/",
            "    Nested/",
            "      deep.txt",
            "    a.txt",
            "    b.txt",
            "  empty",
        ]
    );

    let shallow = h.run(&["tree", IMAGE, "--depth", "1"]).unwrap();
    assert_eq!(lines(&shallow), ["/", "  Docs/", "  empty"]);
}

#[test]
fn find_reports_slash_paths() {
    let h = harness();
    let output = h.run(&["find", IMAGE, "TXT"]).unwrap();
    assert_eq!(
        lines(&output),
        ["/Docs/a.txt", "/Docs/b.txt", "/Docs/Nested/deep.txt"]
    );

    let limited = h.run(&["find", IMAGE, "txt", "/Docs", "--limit", "1"]).unwrap();
    assert_eq!(lines(&limited), ["/Docs/a.txt"]);
}

#[test]
fn info_describes_the_volume() {
    let h = harness();
    let output = h.run(&["info", IMAGE]).unwrap();
    assert!(output.contains("Name:         Test"));
    assert!(output.contains("Access:       read-only"));
    assert!(output.contains("Device:       false"));
}

#[test]
fn mkdir_on_an_image_needs_no_confirmation() {
    let h = harness();
    let output = h.run(&["mkdir", IMAGE, "/Docs/New"]).unwrap();
    assert_eq!(output.trim(), "created New");

    let listing = h.run(&["ls", IMAGE, "/Docs"]).unwrap();
    assert_eq!(lines(&listing), ["Nested/", "New/", "a.txt", "b.txt"]);
}

#[test]
fn device_writes_require_yes() {
    let h = harness();
    let err = h.run(&["mkdir", DEVICE, "/New"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "\"/dev/rdisk4\" is a physical device. Are you sure you want to create folder \"New\"? \
         Pass --yes to go ahead."
    );
    assert_eq!(h.classic.calls("mkdir"), 0);

    h.run(&["mkdir", DEVICE, "/New", "--yes"]).unwrap();
    assert_eq!(h.classic.calls("mkdir"), 1);
}

#[test]
fn unconfirmed_device_writes_never_mount_read_write() {
    let h = harness();
    let err = h.run(&["rm", DEVICE, "/Docs"]).unwrap_err();
    assert!(err.to_string().contains("Pass --yes to go ahead."));
    assert_eq!(h.classic.read_write_mounts(), 0);
    assert_eq!(h.classic.calls("delete"), 0);

    let err = h.run(&["rm", DEVICE, "/Missing"]).unwrap_err();
    assert!(err.to_string().contains("was not found"));
    assert_eq!(h.classic.read_write_mounts(), 0);

    h.run(&["rm", DEVICE, "/Docs", "--yes"]).unwrap();
    assert_eq!(h.classic.read_write_mounts(), 1);
    assert_eq!(lines(&h.run(&["ls", DEVICE]).unwrap()), ["empty"]);
}

#[test]
fn suppressed_warnings_skip_the_device_gate() {
    let h = harness();
    h.run(&["prefs", "--suppress-device-warnings", "true"])
        .unwrap();
    h.run(&["mkdir", DEVICE, "/New"]).unwrap();
    assert!(h.run(&["ls", DEVICE]).unwrap().contains("New/"));
}

#[test]
fn rename_move_copy_and_duplicate() {
    let h = harness();
    assert_eq!(
        h.run(&["rename", IMAGE, "/Docs/a.txt", "renamed.txt"])
            .unwrap()
            .trim(),
        "renamed to renamed.txt"
    );
    h.run(&["mv", IMAGE, "/Docs/renamed.txt", "/"]).unwrap();
    h.run(&["cp", IMAGE, "/Docs/Nested", "/"]).unwrap();
    assert_eq!(
        h.run(&["dup", IMAGE, "/empty"]).unwrap().trim(),
        "created empty copy"
    );

    let root = h.run(&["ls", IMAGE]).unwrap();
    assert_eq!(
        lines(&root),
        ["Docs/", "Nested/", "empty", "empty copy", "renamed.txt"]
    );
    assert_eq!(h.run(&["cat", IMAGE, "/Nested/deep.txt"]).unwrap(), "deep");
    assert_eq!(h.run(&["cat", IMAGE, "/renamed.txt"]).unwrap(), "hello");
}

#[test]
fn rm_removes_folders_with_their_contents() {
    let h = harness();
    h.run(&["rm", IMAGE, "/Docs"]).unwrap();
    assert_eq!(lines(&h.run(&["ls", IMAGE]).unwrap()), ["empty"]);
}

#[test]
fn import_and_export_through_the_host() {
    let h = harness();
    let host = tempfile::tempdir().unwrap();
    let source = host.path().join("notes.txt");
    std::fs::write(&source, b"from the host").unwrap();

    let output = h
        .run(&["import", IMAGE, source.to_str().unwrap(), "--to", "/Docs"])
        .unwrap();
    assert_eq!(output.trim(), "imported notes.txt");
    assert_eq!(
        h.run(&["cat", IMAGE, "/Docs/notes.txt"]).unwrap(),
        "from the host"
    );

    let out_dir = tempfile::tempdir().unwrap();
    h.run(&["export", IMAGE, "/Docs/b.txt", "--to", out_dir.path().to_str().unwrap()])
        .unwrap();
    assert_eq!(
        std::fs::read(out_dir.path().join("b.txt")).unwrap(),
        b"second file"
    );
}

#[test]
fn plus_volumes_refuse_writes() {
    let h = harness();
    assert_eq!(h.run(&["cat", PLUS_IMAGE, "Docs/a.txt"]).unwrap(), "hello");

    let err = h.run(&["mkdir", PLUS_IMAGE, "/New"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VolumeError>(),
        Some(VolumeError::Unsupported { backend: "HFS+", .. })
    ));
}

#[test]
fn prefs_are_printed_and_applied_to_ls() {
    let h = harness();
    let output = h
        .run(&["prefs", "--order", "descending", "--show-hidden", "true"])
        .unwrap();
    assert!(output.contains("show_hidden = true"));
    assert!(output.contains("sort_order = \"descending\""));

    let stored = h.prefs.load();
    assert_eq!(
        stored,
        Preferences {
            show_hidden: true,
            sort_order: hfs_volume::SortOrder::Descending,
            ..Preferences::default()
        }
    );
    assert_eq!(
        lines(&h.run(&["ls", IMAGE, "/Docs"]).unwrap()),
        ["Nested/", "b.txt", "a.txt"]
    );
}
