use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use assert2::assert;
use rezip::{Archive, Lookup, OpenMode};
use tempfile::TempDir;
use zip::ZipArchive;

fn build_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let mut archive = Archive::open(path, OpenMode::Write).unwrap();
    for (name, content) in entries {
        let mut writer = archive.writer(name).unwrap();
        writer.write_all(content).unwrap();
        archive.finish(writer).unwrap();
    }
    archive.close().unwrap();
}

fn read_entry(archive: &mut Archive, name: &str) -> Vec<u8> {
    let mut reader = archive.reader(name).unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    assert!(reader.crc_matches());
    content
}

/// The basic archiver scenario: add a disk file, close, reopen, extract.
#[test]
fn add_close_reopen_extract() {
    let tempdir = TempDir::new().unwrap();
    let source = tempdir.path().join("local_readme.txt");
    fs::write(&source, b"hello world").unwrap();
    let archive_path = tempdir.path().join("test.zip");

    let mut archive = Archive::open(&archive_path, OpenMode::Write).unwrap();
    archive.add_file(&source, "readme.txt", false).unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
    let out_path = tempdir.path().join("extracted.txt");
    let crc_ok = archive.extract_file("readme.txt", &out_path).unwrap();

    assert!(crc_ok);
    assert!(fs::read(&out_path).unwrap() == b"hello world");
    let Some(Lookup::File(info)) = archive.entry("readme.txt") else {
        panic!("entry should resolve to a file");
    };
    assert!(info.uncompressed_size() == 11);
    assert!(info.crc32() == crc32fast::hash(b"hello world"));
}

#[test]
fn various_payload_sizes_round_trip() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");

    let payloads: Vec<(String, Vec<u8>)> = [0usize, 1, 2, 100, 8192, 100_000]
        .iter()
        .map(|&size| {
            let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            (format!("entry_{size}.bin"), content)
        })
        .collect();

    let entries: Vec<(&str, &[u8])> = payloads
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_slice()))
        .collect();
    build_archive(&archive_path, &entries);

    let mut archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
    assert!(archive.len() == payloads.len());
    for (name, content) in &payloads {
        assert!(read_entry(&mut archive, name) == *content);
    }
}

/// Our output must be readable by an unrelated zip implementation.
#[test]
fn output_unzips_with_the_zip_crate() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");
    build_archive(
        &archive_path,
        &[
            ("top.txt", b"top level"),
            ("nested/dir/data.bin", &[0u8; 4096]),
            ("empty.txt", b""),
        ],
    );

    let bytes = fs::read(&archive_path).unwrap();
    let mut unpacked = ZipArchive::new(Cursor::new(bytes)).expect("Should be a valid zip");
    assert!(unpacked.len() == 3);

    let mut unpacked_content = HashMap::new();
    for i in 0..unpacked.len() {
        let mut zipfile = unpacked.by_index(i).unwrap();
        let mut file_content = Vec::new();
        zipfile.read_to_end(&mut file_content).unwrap();
        unpacked_content.insert(zipfile.name().to_owned(), file_content);
    }

    assert!(unpacked_content["top.txt"] == b"top level");
    assert!(unpacked_content["nested/dir/data.bin"] == vec![0u8; 4096]);
    assert!(unpacked_content["empty.txt"].is_empty());
}

/// And the other direction: archives produced by the zip crate must open,
/// including stored entries and explicit directory entries.
#[test]
fn archives_from_the_zip_crate_open() {
    use zip::write::FileOptions;

    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("foreign.zip");

    let mut writer = zip::ZipWriter::new(fs::File::create(&archive_path).unwrap());
    writer.start_file("deflated.txt", FileOptions::default()).unwrap();
    writer.write_all(b"deflate me please, deflate me please").unwrap();
    writer
        .start_file(
            "stored.txt",
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"stored as-is").unwrap();
    writer.add_directory("explicit_dir", FileOptions::default()).unwrap();
    writer.finish().unwrap();

    let mut archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
    assert!(archive.len() == 2);
    assert!(read_entry(&mut archive, "deflated.txt") == b"deflate me please, deflate me please");
    assert!(read_entry(&mut archive, "stored.txt") == b"stored as-is");
    assert!(matches!(
        archive.entry("explicit_dir"),
        Some(Lookup::Directory)
    ));
}

/// Closing a read-write archive without modifications must keep the central
/// directory equivalent: same entry count, same per-entry CRC and sizes.
#[test]
fn rebuild_without_modifications_is_idempotent() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");
    build_archive(
        &archive_path,
        &[
            ("a.txt", b"alpha"),
            ("b/c.txt", b"beta gamma"),
            ("d.bin", &[42u8; 1000]),
        ],
    );

    let stats = |archive: &Archive| -> Vec<(String, u32, u32, u32)> {
        archive
            .entries()
            .map(|e| {
                (
                    e.name().to_owned(),
                    e.crc32(),
                    e.compressed_size(),
                    e.uncompressed_size(),
                )
            })
            .collect()
    };

    let before = {
        let archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
        stats(&archive)
    };

    // Open for modification, change nothing, close; this still rebuilds.
    let archive = Archive::open(&archive_path, OpenMode::ReadWrite).unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
    assert!(stats(&archive) == before);
    assert!(read_entry(&mut archive, "b/c.txt") == b"beta gamma");
}

/// Two consecutive rebuilds with no modifications produce identical bytes.
#[test]
fn second_rebuild_is_byte_stable() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");
    build_archive(&archive_path, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);

    Archive::open(&archive_path, OpenMode::ReadWrite)
        .unwrap()
        .close()
        .unwrap();
    let first = fs::read(&archive_path).unwrap();

    Archive::open(&archive_path, OpenMode::ReadWrite)
        .unwrap()
        .close()
        .unwrap();
    let second = fs::read(&archive_path).unwrap();

    assert!(first == second);
}

#[test]
fn archive_comment_round_trips() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");

    let mut archive = Archive::open(&archive_path, OpenMode::Write).unwrap();
    archive.set_comment(vec![b'c'; 10_000]).unwrap();
    let writer = archive.writer("x.txt").unwrap();
    archive.finish(writer).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&archive_path, OpenMode::Read).unwrap();
    assert!(archive.comment() == vec![b'c'; 10_000]);
    assert!(archive.len() == 1);
}

#[test]
fn trailing_garbage_beyond_the_scan_bound_fails_to_open() {
    let tempdir = TempDir::new().unwrap();
    let archive_path = tempdir.path().join("test.zip");
    build_archive(&archive_path, &[("a.txt", b"alpha")]);

    let mut bytes = fs::read(&archive_path).unwrap();
    bytes.extend(std::iter::repeat(0u8).take(22 + u16::MAX as usize + 1));
    fs::write(&archive_path, bytes).unwrap();

    assert!(matches!(
        Archive::open(&archive_path, OpenMode::Read),
        Err(rezip::Error::MissingEndOfCentralDirectory)
    ));
}
