//! End-to-end tests for writing and reading table files.

use aidb_table::cache::Cache;
use aidb_table::compression::CompressionType;
use aidb_table::config::{FilterConfig, TableOptions};
use aidb_table::env::{Env, PosixEnv};
use aidb_table::key::{InternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use aidb_table::sstable::block_codec::read_block_contents;
use aidb_table::sstable::format::{read_footer, Footer, LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER};
use aidb_table::sstable::{
    Block, BlockHandle, ChecksumType, IndexType, InternalIterator, LookupResult, ReadOptions, TableBuilder,
    TableBuilderOptions, TableContext, TableReader,
};
use proptest::prelude::*;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn ikey(user_key: &[u8], seq: u64) -> Vec<u8> {
    InternalKey::new(user_key, seq, ValueType::Value).into_encoded()
}

fn lookup_key(user_key: &[u8]) -> Vec<u8> {
    InternalKey::for_seek(user_key, MAX_SEQUENCE_NUMBER).into_encoded()
}

fn write_table(path: &Path, options: TableOptions, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Arc<TableContext> {
    let ctx = Arc::new(TableContext::new(options).unwrap());
    let file = PosixEnv.new_writable_file(path).unwrap();
    let mut builder = TableBuilder::new(Arc::clone(&ctx), file, TableBuilderOptions::default());
    for (user_key, value) in entries {
        builder.add(&ikey(user_key, 1), value).unwrap();
    }
    let size = builder.finish().unwrap();
    assert_eq!(size, std::fs::metadata(path).unwrap().len());
    ctx
}

fn numbered_entries(n: usize, value_len: usize) -> BTreeMap<Vec<u8>, Vec<u8>> {
    (0..n)
        .map(|i| {
            let key = format!("key{:06}", i).into_bytes();
            let value = format!("value{:06}", i).into_bytes().repeat(value_len / 11 + 1);
            (key, value)
        })
        .collect()
}

fn assert_contents(reader: &TableReader, entries: &BTreeMap<Vec<u8>, Vec<u8>>) {
    let opts = ReadOptions::default();
    for (user_key, value) in entries {
        assert_eq!(
            reader.get(&opts, &lookup_key(user_key)).unwrap(),
            LookupResult::Found(value.clone()),
            "key {:?}",
            String::from_utf8_lossy(user_key)
        );
    }

    let mut iter = reader.iter(opts);
    iter.seek_to_first();
    let mut expected = entries.iter();
    while iter.valid() {
        let (user_key, value) = expected.next().expect("iterator yielded an extra entry");
        assert_eq!(iter.key(), ikey(user_key, 1).as_slice());
        assert_eq!(iter.value(), value.as_slice());
        iter.next();
    }
    iter.status().unwrap();
    assert!(expected.next().is_none(), "iterator stopped early");
}

fn table_path(dir: &TempDir) -> PathBuf {
    dir.path().join("000001.sst")
}

#[test]
fn test_round_trip_with_every_index_and_filter_shape() {
    env_logger::try_init().ok();

    let entries = numbered_entries(3000, 40);
    let shapes = [
        (IndexType::BinarySearch, FilterConfig::None, false),
        (IndexType::BinarySearch, FilterConfig::default(), false),
        (
            IndexType::BinarySearch,
            FilterConfig::Bloom {
                bits_per_key: 10,
                block_based: true,
            },
            false,
        ),
        (IndexType::TwoLevelIndexSearch, FilterConfig::default(), false),
        (IndexType::TwoLevelIndexSearch, FilterConfig::default(), true),
    ];

    for (index_type, filter, partition_filters) in shapes {
        let dir = TempDir::new().unwrap();
        let options = TableOptions::default()
            .block_size(1024)
            .metadata_block_size(256)
            .index_type(index_type)
            .filter(filter)
            .partition_filters(partition_filters);
        let ctx = write_table(&table_path(&dir), options, &entries);
        let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();

        assert_eq!(reader.index_type(), index_type);
        assert_contents(&reader, &entries);
        assert_eq!(
            reader.get(&ReadOptions::default(), &lookup_key(b"key999999")).unwrap(),
            LookupResult::NotFound
        );
    }
}

#[test]
fn test_partitioned_index_properties() {
    let dir = TempDir::new().unwrap();
    let entries = numbered_entries(5000, 40);
    let options = TableOptions::default()
        .block_size(512)
        .metadata_block_size(128)
        .index_type(IndexType::TwoLevelIndexSearch)
        .partition_filters(true);
    let ctx = write_table(&table_path(&dir), options, &entries);
    let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();

    let props = reader.properties().unwrap();
    assert_eq!(props.num_entries, 5000);
    assert!(props.num_data_blocks > 100);
    assert!(props.index_partitions > 1, "partitions: {}", props.index_partitions);
    assert!(props.top_level_index_size > 0);
    assert!(props.index_size > props.top_level_index_size);
    assert!(props.filter_size > 0);
    assert_eq!(props.index_type().unwrap(), Some(IndexType::TwoLevelIndexSearch));
}

#[test]
fn test_compression_falls_back_for_incompressible_blocks() {
    if !CompressionType::Snappy.is_supported() {
        return;
    }
    let mut rng = rand::rng();
    let random: BTreeMap<Vec<u8>, Vec<u8>> = (0..500)
        .map(|i| {
            let value: Vec<u8> = (0..200).map(|_| rng.random()).collect();
            (format!("key{:06}", i).into_bytes(), value)
        })
        .collect();
    let repetitive = numbered_entries(500, 200);

    for (entries, expect_compressed) in [(&random, false), (&repetitive, true)] {
        let dir = TempDir::new().unwrap();
        let path = table_path(&dir);
        let options = TableOptions::default().compression(CompressionType::Snappy).block_size(4096);
        let ctx = write_table(&path, options, entries);

        let file = PosixEnv.new_random_access_file(&path).unwrap();
        let footer = read_footer(file.as_ref(), file.size().unwrap(), None).unwrap();
        let index_contents = read_block_contents(file.as_ref(), footer.checksum, &footer.index_handle, true)
            .unwrap()
            .into_uncompressed(footer.format_version, &[])
            .unwrap();
        let index = Block::new(index_contents).unwrap();
        let mut index_iter = index.iter(Arc::new(ctx.comparator.clone()));
        index_iter.seek_to_first();
        let first = BlockHandle::decode(index_iter.value()).unwrap();
        let contents = read_block_contents(file.as_ref(), footer.checksum, &first, true).unwrap();

        let expected = if expect_compressed {
            CompressionType::Snappy
        } else {
            CompressionType::None
        };
        assert_eq!(contents.compression, expected);

        let reader = TableReader::open_path(ctx, &path).unwrap();
        assert_contents(&reader, entries);
    }
}

#[test]
fn test_legacy_footer_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir);
    let entries = numbered_entries(200, 20);
    let options = TableOptions::default().format_version(0).checksum(ChecksumType::Crc32);
    let ctx = write_table(&path, options, &entries);

    let file = PosixEnv.new_random_access_file(&path).unwrap();
    let size = file.size().unwrap();
    let footer = read_footer(file.as_ref(), size, None).unwrap();
    assert_eq!(footer.table_magic_number, LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER);
    assert_eq!(footer.format_version, 0);
    assert_eq!(footer.encoded_length(), Footer::LEGACY_ENCODED_LENGTH);
    assert_eq!(footer.index_handle.end_offset(), size - Footer::LEGACY_ENCODED_LENGTH as u64);

    let reader = TableReader::open_path(ctx, &path).unwrap();
    assert_contents(&reader, &entries);
}

#[test]
fn test_xxhash_checksum_table() {
    let dir = TempDir::new().unwrap();
    let entries = numbered_entries(300, 20);
    let options = TableOptions::default().checksum(ChecksumType::XxHash);
    let ctx = write_table(&table_path(&dir), options, &entries);
    let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();
    assert_contents(&reader, &entries);
}

#[test]
fn test_full_filter_false_positive_rate() {
    let dir = TempDir::new().unwrap();
    let entries = numbered_entries(10_000, 8);
    // The prefix covers the whole key, so absent keys exercise the filter.
    let options = TableOptions::default().prefix_len(Some(9)).whole_key_filtering(false);
    let ctx = write_table(&table_path(&dir), options, &entries);
    let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();

    for user_key in entries.keys() {
        assert!(reader.prefix_may_match(user_key));
    }
    let false_positives = (0..10_000)
        .filter(|i| reader.prefix_may_match(format!("abs{:06}", i).as_bytes()))
        .count();
    assert!(false_positives < 300, "false positives: {}", false_positives);

    let opts = ReadOptions {
        verify_checksums: true,
        fill_cache: false,
    };
    for i in (0..10_000).step_by(97) {
        let key = format!("key{:06}", i);
        assert!(matches!(reader.get(&opts, &lookup_key(key.as_bytes())).unwrap(), LookupResult::Found(_)));
    }
}

#[test]
fn test_block_cache_serves_repeated_reads() {
    let dir = TempDir::new().unwrap();
    let entries = numbered_entries(2000, 40);
    let ctx = write_table(&table_path(&dir), TableOptions::default().block_size(1024), &entries);
    let cache = ctx.block_cache.clone().unwrap();
    let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();

    let before = cache.usage();
    assert_contents(&reader, &entries);
    let warmed = cache.usage();
    assert!(warmed > before);

    // Reads that skip cache fills leave the cache untouched.
    let opts = ReadOptions {
        verify_checksums: true,
        fill_cache: false,
    };
    reader.get(&opts, &lookup_key(b"key000010")).unwrap();
    assert_eq!(cache.usage(), warmed);
}

#[test]
fn test_properties_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir);
    let ctx = Arc::new(TableContext::new(TableOptions::default()).unwrap());
    let file = PosixEnv.new_writable_file(&path).unwrap();
    let opts = TableBuilderOptions {
        column_family_id: 3,
        column_family_name: "users".to_string(),
        ..TableBuilderOptions::default()
    };
    let mut builder = TableBuilder::new(Arc::clone(&ctx), file, opts);
    builder.add(&ikey(b"a", 5), b"1").unwrap();
    builder
        .add(&InternalKey::new(b"b", 4, ValueType::Deletion).into_encoded(), b"")
        .unwrap();
    builder
        .add(&InternalKey::new(b"c", 3, ValueType::Merge).into_encoded(), b"+1")
        .unwrap();
    builder.finish().unwrap();
    let written = builder.table_properties().clone();

    let reader = TableReader::open_path(ctx, &path).unwrap();
    let props = reader.properties().unwrap();
    assert_eq!(props.num_entries, 3);
    assert_eq!(props.column_family_id, 3);
    assert_eq!(props.column_family_name, "users");
    assert_eq!(props.data_size, written.data_size);
    assert_eq!(props.num_data_blocks, 1);
    assert_eq!(props.comparator_name, written.comparator_name);
    assert_eq!(props.filter_policy_name, "aidb.BuiltinBloomFilter");
    assert_eq!(props.user_u64(aidb_table::sstable::properties::names::DELETED_KEYS), Some(1));
    assert_eq!(props.user_u64(aidb_table::sstable::properties::names::MERGE_OPERANDS), Some(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_any_sorted_entries_read_back(
        entries in prop::collection::btree_map(
            prop::collection::vec(any::<u8>(), 1..24),
            prop::collection::vec(any::<u8>(), 0..64),
            1..300,
        ),
        partitioned in any::<bool>(),
        restart_interval in 1usize..20,
    ) {
        let dir = TempDir::new().unwrap();
        let index_type = if partitioned {
            IndexType::TwoLevelIndexSearch
        } else {
            IndexType::BinarySearch
        };
        let options = TableOptions::default()
            .block_size(256)
            .metadata_block_size(64)
            .block_restart_interval(restart_interval)
            .index_type(index_type);
        let ctx = write_table(&table_path(&dir), options, &entries);
        let reader = TableReader::open_path(ctx, &table_path(&dir)).unwrap();
        assert_contents(&reader, &entries);
    }
}
