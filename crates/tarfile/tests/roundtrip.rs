use std::path::Path;

use chrono::{DateTime, Utc};
use rstest::rstest;
use tarfile::{
    Compression, CompressionLevel, EntryKind, ResourceAttributes, ResourceMetadata, TarFile,
    TarFileWriter, WriteOptions,
};

fn metadata(executable: bool, read_only: bool) -> ResourceMetadata {
    ResourceMetadata {
        modified: DateTime::<Utc>::from_timestamp(1_600_000_000, 0),
        attributes: Some(ResourceAttributes {
            executable,
            read_only,
        }),
    }
}

fn archive_name(compression: Compression) -> &'static str {
    match compression {
        Compression::None => "archive.tar",
        Compression::Gzip => "archive.tar.gz",
        Compression::Bzip2 => "archive.tar.bz2",
    }
}

#[rstest]
#[case(Compression::None)]
#[case(Compression::Gzip)]
#[case(Compression::Bzip2)]
fn test_directory_and_file(#[case] compression: Compression) {
    let temp_dir = tempfile::tempdir().unwrap();
    let archive_path = temp_dir.path().join(archive_name(compression));

    let mut writer = TarFileWriter::create(&archive_path, compression).unwrap();
    writer
        .write_directory("a/", &metadata(false, false))
        .unwrap();
    writer
        .write_file("a/b.txt", &metadata(false, false), 2, &b"hi".to_vec())
        .unwrap();
    writer.finish().unwrap();

    let mut archive = TarFile::open(&archive_path).unwrap();
    assert_eq!(archive.compression(), compression);
    assert_eq!(archive.path(), archive_path.as_path());

    let entries = archive.entries().collect::<Vec<_>>();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].name(), "a/");
    assert_eq!(entries[0].kind(), EntryKind::Directory);
    assert_eq!(entries[0].size(), 0);

    assert_eq!(entries[1].name(), "a/b.txt");
    assert_eq!(entries[1].kind(), EntryKind::File);
    assert_eq!(entries[1].size(), 2);
    assert_eq!(entries[1].mtime(), Some(1_600_000_000));
    assert!(!entries[1].is_executable());
    assert!(!entries[1].is_read_only());

    assert_eq!(archive.content_of(&entries[1]).unwrap().read_all().unwrap(), b"hi");
    assert!(archive.content_of(&entries[0]).unwrap().read_all().unwrap().is_empty());
    archive.close();
}

#[rstest]
#[case(Compression::None, CompressionLevel::Default)]
#[case(Compression::Gzip, CompressionLevel::Lowest)]
#[case(Compression::Gzip, CompressionLevel::Numeric(0))]
#[case(Compression::Bzip2, CompressionLevel::Highest)]
fn test_files_from_disk(#[case] compression: Compression, #[case] level: CompressionLevel) {
    let temp_dir = tempfile::tempdir().unwrap();
    let input_dir = temp_dir.path().join("input");
    fs_err::create_dir_all(&input_dir).unwrap();

    let files = [
        ("empty.txt", Vec::new()),
        ("small.txt", b"hello world".to_vec()),
        ("block.bin", vec![0xab; 512]),
        ("large.bin", (0..100_000u32).map(|i| (i % 251) as u8).collect()),
    ];
    for (name, content) in &files {
        fs_err::write(input_dir.join(name), content).unwrap();
    }

    let archive_path = temp_dir.path().join(archive_name(compression));
    let options = WriteOptions::new(compression)
        .with_compression_level(level)
        .with_chunk_size(1000);
    let mut writer = TarFileWriter::create_with_options(&archive_path, options).unwrap();
    writer
        .write_directory(
            "input",
            &ResourceMetadata::from_path(&input_dir).unwrap(),
        )
        .unwrap();
    for (name, content) in &files {
        let path = input_dir.join(name);
        writer
            .write_file(
                &format!("input/{name}"),
                &ResourceMetadata::from_path(&path).unwrap(),
                content.len() as u64,
                &path,
            )
            .unwrap();
    }
    writer.finish().unwrap();

    let mut archive = TarFile::open(&archive_path).unwrap();
    let entries = archive.entries().collect::<Vec<_>>();
    let names = entries.iter().map(|entry| entry.name()).collect::<Vec<_>>();
    assert_eq!(
        names,
        [
            "input/",
            "input/empty.txt",
            "input/small.txt",
            "input/block.bin",
            "input/large.bin"
        ]
    );

    for (entry, (_, content)) in entries[1..].iter().zip(&files) {
        assert_eq!(entry.size(), content.len() as u64);
        assert!(entry.modified().is_some());
        assert_eq!(&archive.content_of(entry).unwrap().read_all().unwrap(), content);
    }
}

#[rstest]
#[case(Compression::None)]
#[case(Compression::Gzip)]
#[case(Compression::Bzip2)]
fn test_long_names(#[case] compression: Compression) {
    let long_dir = format!("{}/", "directory".repeat(15));
    let long_file = format!("{long_dir}{}.txt", "file".repeat(40));

    let mut writer = TarFileWriter::new(Vec::new(), WriteOptions::new(compression)).unwrap();
    writer
        .write_directory(&long_dir, &ResourceMetadata::default())
        .unwrap();
    writer
        .write_file(&long_file, &ResourceMetadata::default(), 4, &b"long".to_vec())
        .unwrap();
    let data = writer.finish().unwrap();

    let mut archive = TarFile::from_source(data).unwrap();
    let entries = archive.entries().collect::<Vec<_>>();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name(), long_dir);
    assert!(entries[0].is_dir());
    assert_eq!(entries[1].name(), long_file);
    assert_eq!(archive.content_of(&entries[1]).unwrap().read_all().unwrap(), b"long");
}

#[test]
fn test_permissions() {
    let mut writer = TarFileWriter::new(Vec::new(), WriteOptions::default()).unwrap();
    writer
        .write_file("plain", &metadata(false, false), 0, &Vec::<u8>::new())
        .unwrap();
    writer
        .write_file("exec", &metadata(true, false), 0, &Vec::<u8>::new())
        .unwrap();
    writer
        .write_file("locked", &metadata(false, true), 0, &Vec::<u8>::new())
        .unwrap();
    writer
        .write_directory("locked-dir", &metadata(false, true))
        .unwrap();
    writer
        .write_file("unknown", &ResourceMetadata::default(), 0, &Vec::<u8>::new())
        .unwrap();
    let data = writer.finish().unwrap();

    let mut archive = TarFile::from_source(data).unwrap();
    let modes = archive
        .entries()
        .map(|entry| (entry.name().to_owned(), entry.mode(), entry.mtime()))
        .collect::<Vec<_>>();
    assert_eq!(
        modes,
        [
            (String::from("plain"), 0o644, Some(1_600_000_000)),
            (String::from("exec"), 0o755, Some(1_600_000_000)),
            (String::from("locked"), 0o444, Some(1_600_000_000)),
            (String::from("locked-dir/"), 0o555, Some(1_600_000_000)),
            (String::from("unknown"), 0o644, None),
        ]
    );
}

#[test]
fn test_existing_file_is_overwritten() {
    let temp_dir = tempfile::tempdir().unwrap();
    let archive_path = temp_dir.path().join("archive.tar");
    fs_err::write(&archive_path, vec![b'x'; 10_000]).unwrap();

    let writer = TarFileWriter::create(&archive_path, Compression::None).unwrap();
    writer.finish().unwrap();

    assert_eq!(fs_err::metadata(&archive_path).unwrap().len(), 1024);
    let mut archive = TarFile::open(Path::new(&archive_path)).unwrap();
    assert_eq!(archive.entries().count(), 0);
}
