//! Damaged table files must surface as corruption, never as wrong data.

use aidb_table::compression::CompressionType;
use aidb_table::config::{FilterConfig, TableOptions};
use aidb_table::sstable::format::{BlockHandle, Footer};
use aidb_table::sstable::IndexType;
use aidb_table::env::{Env, PosixEnv};
use aidb_table::key::{InternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use aidb_table::sstable::format::read_footer;
use aidb_table::sstable::{
    ChecksumType, InternalIterator, LookupResult, ReadOptions, TableBuilder, TableBuilderOptions, TableContext,
    TableReader,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn lookup_key(user_key: &[u8]) -> Vec<u8> {
    InternalKey::for_seek(user_key, MAX_SEQUENCE_NUMBER).into_encoded()
}

fn options(checksum: ChecksumType) -> TableOptions {
    TableOptions::default()
        .block_size(512)
        .compression(CompressionType::None)
        .filter(FilterConfig::None)
        .checksum(checksum)
}

fn write_table(path: &Path, options: TableOptions) {
    let ctx = Arc::new(TableContext::new(options).unwrap());
    let file = PosixEnv.new_writable_file(path).unwrap();
    let mut builder = TableBuilder::new(ctx, file, TableBuilderOptions::default());
    for i in 0..500 {
        let key = InternalKey::new(format!("key{:05}", i).as_bytes(), 1, ValueType::Value);
        builder.add(key.encode(), format!("value{:05}", i).as_bytes()).unwrap();
    }
    builder.finish().unwrap();
}

fn flip_byte(path: &Path, offset: u64) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset as usize] ^= 0x40;
    fs::write(path, bytes).unwrap();
}

fn open(path: &Path, options: TableOptions) -> aidb_table::Result<TableReader> {
    // A fresh context so no block is served from a cache filled before the damage.
    TableReader::open_path(Arc::new(TableContext::new(options).unwrap()), path)
}

#[test]
fn test_flipped_data_byte_is_reported() {
    env_logger::try_init().ok();

    for checksum in [ChecksumType::Crc32, ChecksumType::XxHash] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        write_table(&path, options(checksum));
        flip_byte(&path, 20);

        let reader = open(&path, options(checksum)).unwrap();
        let err = reader
            .get(&ReadOptions::default(), &lookup_key(b"key00000"))
            .unwrap_err();
        assert!(err.is_corruption(), "{:?}: {}", checksum, err);

        // Untouched blocks still read.
        assert_eq!(
            reader
                .get(&ReadOptions::default(), &lookup_key(b"key00499"))
                .unwrap(),
            LookupResult::Found(b"value00499".to_vec())
        );

        let mut iter = reader.iter(ReadOptions::default());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
    }
}

#[test]
fn test_unverified_read_skips_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.sst");
    write_table(&path, options(ChecksumType::Crc32));

    // The second data block starts right after the first block's trailer.
    let scout = open(&path, options(ChecksumType::Crc32)).unwrap();
    let second_block = (0..500)
        .map(|i| scout.approximate_offset_of(&lookup_key(format!("key{:05}", i).as_bytes())))
        .find(|&offset| offset > 0)
        .unwrap();
    drop(scout);
    // Damage only the stored checksum of the first block.
    flip_byte(&path, second_block - 1);

    let reader = open(&path, options(ChecksumType::Crc32)).unwrap();
    let verified = reader.get(&ReadOptions::default(), &lookup_key(b"key00000"));
    assert!(verified.unwrap_err().is_corruption());

    let unverified = ReadOptions {
        verify_checksums: false,
        fill_cache: false,
    };
    assert_eq!(
        reader.get(&unverified, &lookup_key(b"key00000")).unwrap(),
        LookupResult::Found(b"value00000".to_vec())
    );
}

#[test]
fn test_damaged_footer_and_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.sst");
    write_table(&path, options(ChecksumType::Crc32));
    let size = fs::metadata(&path).unwrap().len();

    let file = PosixEnv.new_random_access_file(&path).unwrap();
    let footer = read_footer(file.as_ref(), size, None).unwrap();
    drop(file);

    let index_path = dir.path().join("000002.sst");
    fs::copy(&path, &index_path).unwrap();
    flip_byte(&index_path, footer.index_handle.offset + 1);
    let err = open(&index_path, options(ChecksumType::Crc32).prefetch_index_and_filter_in_open(true))
        .err()
        .unwrap();
    assert!(err.is_corruption(), "{}", err);

    // Lazily loaded index fails on first use instead.
    let reader = open(&index_path, options(ChecksumType::Crc32).prefetch_index_and_filter_in_open(false)).unwrap();
    let err = reader
        .get(&ReadOptions::default(), &lookup_key(b"key00001"))
        .unwrap_err();
    assert!(err.is_corruption());

    flip_byte(&path, size - 1);
    let err = open(&path, options(ChecksumType::Crc32)).err().unwrap();
    assert!(err.is_corruption(), "{}", err);
    assert!(err.to_string().contains("magic"), "{}", err);

    let truncated = dir.path().join("000003.sst");
    fs::write(&truncated, b"short").unwrap();
    assert!(open(&truncated, options(ChecksumType::Crc32)).err().unwrap().is_corruption());
}

#[test]
fn test_unreadable_properties_keep_partitioned_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.sst");
    let partitioned = options(ChecksumType::Crc32)
        .metadata_block_size(128)
        .index_type(IndexType::TwoLevelIndexSearch);
    write_table(&path, partitioned.clone());

    let data_size = open(&path, partitioned.clone())
        .unwrap()
        .properties()
        .unwrap()
        .data_size;
    // Without a filter the properties block follows the data blocks.
    flip_byte(&path, data_size + 2);

    let reader = open(&path, partitioned).unwrap();
    assert!(reader.properties().is_none());
    assert_eq!(reader.index_type(), IndexType::TwoLevelIndexSearch);
    for i in 0..500 {
        assert_eq!(
            reader
                .get(&ReadOptions::default(), &lookup_key(format!("key{:05}", i).as_bytes()))
                .unwrap(),
            LookupResult::Found(format!("value{:05}", i).into_bytes())
        );
    }
}

#[test]
fn test_oversized_footer_handle_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.sst");
    write_table(&path, options(ChecksumType::Crc32));
    let mut bytes = fs::read(&path).unwrap();
    let size = bytes.len() as u64;

    let file = PosixEnv.new_random_access_file(&path).unwrap();
    let footer = read_footer(file.as_ref(), size, None).unwrap();
    drop(file);

    let damaged = Footer::new(
        footer.format_version,
        footer.checksum,
        footer.metaindex_handle,
        BlockHandle::new(0, 1 << 46),
    );
    let encoded = damaged.encode();
    let start = bytes.len() - encoded.len();
    bytes[start..].copy_from_slice(&encoded);
    fs::write(&path, &bytes).unwrap();

    let err = open(&path, options(ChecksumType::Crc32)).err().unwrap();
    assert!(err.is_corruption(), "{}", err);
    assert!(err.to_string().contains("past end of file"), "{}", err);
}
