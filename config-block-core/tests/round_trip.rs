use std::path::PathBuf;

use config_block_core::{normalize, parse, parse_file, write, write_file};
use pretty_assertions::assert_eq;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

#[test]
fn parse_write_parse_preserves_records() {
    for name in [
        "fixtures/fortigate-01.txt",
        "fixtures/fortigate-02.txt",
        "fixtures/vdoms.txt",
    ] {
        let first = parse_file(&fixture(name)).expect("initial parse should succeed");
        let written = write(&first);
        let second = parse(&written).expect("re-parse should succeed");

        assert_eq!(normalize(&first), normalize(&second), "{name}");
        assert_eq!(first.header, second.header, "{name}");
    }
}

#[test]
fn write_file_round_trip() {
    let out_dir = tempfile::tempdir().expect("tempdir should be created");
    let out_path = out_dir.path().join("roundtrip.txt");

    let doc = parse_file(&fixture("fixtures/fortigate-02.txt")).expect("parse should succeed");
    write_file(&doc, &out_path).expect("write_file should succeed");
    let reparsed = parse_file(&out_path).expect("written file should parse");

    assert_eq!(normalize(&doc), normalize(&reparsed));
}
