use hfs_cli::cli::hfsview_main;

fn main() {
    hfsview_main();
}
