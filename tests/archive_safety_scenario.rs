use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use containai::runtime::RuntimeAdapter;
use containai::sync::SyncEngine;

fn write_tgz_with_entry(name: &str, contents: &[u8]) -> tempfile::TempDir {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("archive.tgz");
    let file = std::fs::File::create(&path).unwrap();
    let enc = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(enc);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append_data(&mut header, name, contents).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    td
}

/// Spec §8 scenario 4: an archive containing a parent-traversal entry is
/// refused before the target volume is ever touched. `validate_archive`
/// runs ahead of any runtime call inside `restore`, so this exercises the
/// real rejection path without needing a container daemon on the test host.
#[test]
fn restore_refuses_archive_with_parent_traversal_entry() {
    let td = write_tgz_with_entry("../evil", b"payload");
    let adapter = RuntimeAdapter::default();
    let engine = SyncEngine::new(&adapter, None);

    let err = engine
        .restore(&td.path().join("archive.tgz"), "some-volume")
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("parent-traversal") || message.contains(".."),
        "expected a parent-traversal rejection, got: {message}"
    );
}

#[test]
fn restore_rejects_invalid_volume_name_before_opening_the_archive() {
    let adapter = RuntimeAdapter::default();
    let engine = SyncEngine::new(&adapter, None);

    let missing = tempfile::tempdir().unwrap().path().join("does-not-exist.tgz");
    let err = engine.restore(&missing, "../not a valid volume name").unwrap_err();
    assert!(matches!(err, containai::error::ContainAiError::Usage(_)));
}
