//! Table properties and property collectors.
//!
//! Properties are stored in a meta block as `name -> value` entries sorted by
//! name. Numeric properties are varint64 encoded; string properties are raw
//! bytes. Collected properties of unknown name are kept as user properties.

use crate::comparator::BytewiseComparator;
use crate::error::{Error, Result};
use crate::key::ValueType;
use crate::sstable::block::{Block, BlockBuilder};
use crate::sstable::index::IndexType;
use crate::sstable::iterator::InternalIterator;
use crate::util::coding::{decode_fixed32, decode_varint64, put_fixed32, put_varint64};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Property names.
#[allow(missing_docs)]
pub mod names {
    pub const DATA_SIZE: &str = "aidb.data.size";
    pub const INDEX_SIZE: &str = "aidb.index.size";
    pub const INDEX_PARTITIONS: &str = "aidb.index.partitions";
    pub const TOP_LEVEL_INDEX_SIZE: &str = "aidb.top-level.index.size";
    pub const FILTER_SIZE: &str = "aidb.filter.size";
    pub const RAW_KEY_SIZE: &str = "aidb.raw.key.size";
    pub const RAW_VALUE_SIZE: &str = "aidb.raw.value.size";
    pub const NUM_DATA_BLOCKS: &str = "aidb.num.data.blocks";
    pub const NUM_ENTRIES: &str = "aidb.num.entries";
    pub const NUM_RANGE_DELETIONS: &str = "aidb.num.range-deletions";
    pub const FORMAT_VERSION: &str = "aidb.format.version";
    pub const FIXED_KEY_LEN: &str = "aidb.fixed.key.length";
    pub const CREATION_TIME: &str = "aidb.creation.time";
    pub const COLUMN_FAMILY_ID: &str = "aidb.column.family.id";
    pub const COLUMN_FAMILY_NAME: &str = "aidb.column.family.name";
    pub const MERGE_OPERATOR: &str = "aidb.merge.operator";
    pub const FILTER_POLICY: &str = "aidb.filter.policy";
    pub const COMPARATOR: &str = "aidb.comparator";
    pub const PREFIX_EXTRACTOR: &str = "aidb.prefix.extractor.name";
    pub const PROPERTY_COLLECTORS: &str = "aidb.property.collectors";
    pub const COMPRESSION: &str = "aidb.compression";

    // Written by the built-in collectors.
    pub const DELETED_KEYS: &str = "aidb.deleted.keys";
    pub const MERGE_OPERANDS: &str = "aidb.merge.operands";
    pub const INDEX_TYPE: &str = "aidb.block.based.table.index.type";
    pub const WHOLE_KEY_FILTERING: &str = "aidb.block.based.table.whole.key.filtering";
    pub const PREFIX_FILTERING: &str = "aidb.block.based.table.prefix.filtering";
}

/// Summary of a table, written at build time.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub data_size: u64,
    pub index_size: u64,
    pub index_partitions: u64,
    pub top_level_index_size: u64,
    pub filter_size: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub num_data_blocks: u64,
    pub num_entries: u64,
    pub num_range_deletions: u64,
    pub format_version: u64,
    pub fixed_key_len: u64,
    pub creation_time: u64,
    pub column_family_id: u64,
    pub column_family_name: String,
    pub merge_operator_name: String,
    pub filter_policy_name: String,
    pub comparator_name: String,
    pub prefix_extractor_name: String,
    pub property_collectors_names: String,
    pub compression_name: String,
    /// Properties added by collectors.
    pub user_collected_properties: BTreeMap<String, Vec<u8>>,
    /// Human readable forms of the collected properties.
    pub readable_properties: BTreeMap<String, String>,
}

impl TableProperties {
    fn numeric_fields(&self) -> [(&'static str, u64); 14] {
        [
            (names::DATA_SIZE, self.data_size),
            (names::INDEX_SIZE, self.index_size),
            (names::INDEX_PARTITIONS, self.index_partitions),
            (names::TOP_LEVEL_INDEX_SIZE, self.top_level_index_size),
            (names::FILTER_SIZE, self.filter_size),
            (names::RAW_KEY_SIZE, self.raw_key_size),
            (names::RAW_VALUE_SIZE, self.raw_value_size),
            (names::NUM_DATA_BLOCKS, self.num_data_blocks),
            (names::NUM_ENTRIES, self.num_entries),
            (names::NUM_RANGE_DELETIONS, self.num_range_deletions),
            (names::FORMAT_VERSION, self.format_version),
            (names::FIXED_KEY_LEN, self.fixed_key_len),
            (names::CREATION_TIME, self.creation_time),
            (names::COLUMN_FAMILY_ID, self.column_family_id),
        ]
    }

    fn numeric_field_mut(&mut self, name: &str) -> Option<&mut u64> {
        Some(match name {
            names::DATA_SIZE => &mut self.data_size,
            names::INDEX_SIZE => &mut self.index_size,
            names::INDEX_PARTITIONS => &mut self.index_partitions,
            names::TOP_LEVEL_INDEX_SIZE => &mut self.top_level_index_size,
            names::FILTER_SIZE => &mut self.filter_size,
            names::RAW_KEY_SIZE => &mut self.raw_key_size,
            names::RAW_VALUE_SIZE => &mut self.raw_value_size,
            names::NUM_DATA_BLOCKS => &mut self.num_data_blocks,
            names::NUM_ENTRIES => &mut self.num_entries,
            names::NUM_RANGE_DELETIONS => &mut self.num_range_deletions,
            names::FORMAT_VERSION => &mut self.format_version,
            names::FIXED_KEY_LEN => &mut self.fixed_key_len,
            names::CREATION_TIME => &mut self.creation_time,
            names::COLUMN_FAMILY_ID => &mut self.column_family_id,
            _ => return None,
        })
    }

    fn string_field_mut(&mut self, name: &str) -> Option<&mut String> {
        Some(match name {
            names::COLUMN_FAMILY_NAME => &mut self.column_family_name,
            names::MERGE_OPERATOR => &mut self.merge_operator_name,
            names::FILTER_POLICY => &mut self.filter_policy_name,
            names::COMPARATOR => &mut self.comparator_name,
            names::PREFIX_EXTRACTOR => &mut self.prefix_extractor_name,
            names::PROPERTY_COLLECTORS => &mut self.property_collectors_names,
            names::COMPRESSION => &mut self.compression_name,
            _ => return None,
        })
    }

    /// Encodes the properties block contents.
    pub fn encode(&self) -> Vec<u8> {
        let mut entries: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
        for (name, value) in self.numeric_fields() {
            let mut buf = Vec::new();
            put_varint64(&mut buf, value);
            entries.insert(name, buf);
        }
        let strings = [
            (names::COLUMN_FAMILY_NAME, &self.column_family_name),
            (names::MERGE_OPERATOR, &self.merge_operator_name),
            (names::FILTER_POLICY, &self.filter_policy_name),
            (names::COMPARATOR, &self.comparator_name),
            (names::PREFIX_EXTRACTOR, &self.prefix_extractor_name),
            (names::PROPERTY_COLLECTORS, &self.property_collectors_names),
            (names::COMPRESSION, &self.compression_name),
        ];
        for (name, value) in strings {
            if !value.is_empty() {
                entries.insert(name, value.as_bytes().to_vec());
            }
        }
        for (name, value) in &self.user_collected_properties {
            entries.entry(name.as_str()).or_insert_with(|| value.clone());
        }

        let mut builder = BlockBuilder::new(1);
        for (name, value) in &entries {
            builder.add(name.as_bytes(), value);
        }
        builder.finish().to_vec()
    }

    /// Decodes a properties block.
    pub fn decode(block: &Block) -> Result<Self> {
        let mut props = TableProperties::default();
        let mut iter = block.iter(Arc::new(BytewiseComparator));
        iter.seek_to_first();
        while iter.valid() {
            let name = String::from_utf8_lossy(iter.key()).into_owned();
            let value = iter.value();
            if let Some(field) = props.numeric_field_mut(&name) {
                match decode_varint64(value) {
                    Some((v, _)) => *field = v,
                    None => log::warn!("skipping malformed table property {}", name),
                }
            } else if let Some(field) = props.string_field_mut(&name) {
                *field = String::from_utf8_lossy(value).into_owned();
            } else {
                props.user_collected_properties.insert(name, value.to_vec());
            }
            iter.next();
        }
        iter.status()?;
        Ok(props)
    }

    /// Index layout recorded by the builder, if any.
    pub fn index_type(&self) -> Result<Option<IndexType>> {
        match self.user_collected_properties.get(names::INDEX_TYPE) {
            None => Ok(None),
            Some(raw) if raw.len() == 4 => IndexType::from_u32(decode_fixed32(raw))
                .map(Some)
                .ok_or_else(|| Error::not_supported(format!("index type {}", decode_fixed32(raw)))),
            Some(_) => Err(Error::corruption("malformed index type property")),
        }
    }

    /// A varint user property such as [`names::DELETED_KEYS`].
    pub fn user_u64(&self, name: &str) -> Option<u64> {
        self.user_collected_properties
            .get(name)
            .and_then(|v| decode_varint64(v))
            .map(|(v, _)| v)
    }
}

/// Kind of entry passed to collectors.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Put,
    Delete,
    SingleDelete,
    Merge,
    RangeDeletion,
}

impl From<ValueType> for EntryType {
    fn from(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Value => EntryType::Put,
            ValueType::Deletion => EntryType::Delete,
            ValueType::SingleDeletion => EntryType::SingleDelete,
            ValueType::Merge => EntryType::Merge,
            ValueType::RangeDeletion => EntryType::RangeDeletion,
        }
    }
}

/// Observes every entry of a table as it is built.
pub trait TablePropertiesCollector: Send {
    /// Collector name, recorded in the table properties.
    fn name(&self) -> &str;

    /// Called for each entry added.
    fn add_user_key(
        &mut self,
        user_key: &[u8],
        value: &[u8],
        entry_type: EntryType,
        sequence: u64,
        file_size: u64,
    ) -> Result<()>;

    /// Writes the collected properties when the table is finished.
    fn finish(&mut self, properties: &mut BTreeMap<String, Vec<u8>>) -> Result<()>;

    /// Human readable forms of the collected properties.
    fn readable_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// True if the table should be compacted soon.
    fn need_compact(&self) -> bool {
        false
    }
}

/// Creates one collector per table.
pub trait TablePropertiesCollectorFactory: Send + Sync {
    /// Factory name.
    fn name(&self) -> &str;

    /// A fresh collector.
    fn create_collector(&self) -> Box<dyn TablePropertiesCollector>;
}

/// Counts deletions and merge operands.
#[derive(Debug, Default)]
pub struct InternalKeyPropertiesCollector {
    deleted_keys: u64,
    merge_operands: u64,
}

impl TablePropertiesCollector for InternalKeyPropertiesCollector {
    fn name(&self) -> &str {
        "InternalKeyPropertiesCollector"
    }

    fn add_user_key(&mut self, _: &[u8], _: &[u8], entry_type: EntryType, _: u64, _: u64) -> Result<()> {
        match entry_type {
            EntryType::Delete | EntryType::SingleDelete => self.deleted_keys += 1,
            EntryType::Merge => self.merge_operands += 1,
            EntryType::Put | EntryType::RangeDeletion => {}
        }
        Ok(())
    }

    fn finish(&mut self, properties: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
        for (name, value) in [
            (names::DELETED_KEYS, self.deleted_keys),
            (names::MERGE_OPERANDS, self.merge_operands),
        ] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, value);
            properties.insert(name.to_string(), buf);
        }
        Ok(())
    }

    fn readable_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (names::DELETED_KEYS.to_string(), self.deleted_keys.to_string()),
            (names::MERGE_OPERANDS.to_string(), self.merge_operands.to_string()),
        ])
    }
}

/// Records the index layout and filter settings a reader needs.
#[derive(Debug)]
pub struct BlockBasedTablePropertiesCollector {
    index_type: IndexType,
    whole_key_filtering: bool,
    prefix_filtering: bool,
}

impl BlockBasedTablePropertiesCollector {
    /// Creates the collector for one table.
    pub fn new(index_type: IndexType, whole_key_filtering: bool, prefix_filtering: bool) -> Self {
        Self {
            index_type,
            whole_key_filtering,
            prefix_filtering,
        }
    }
}

impl TablePropertiesCollector for BlockBasedTablePropertiesCollector {
    fn name(&self) -> &str {
        "BlockBasedTablePropertiesCollector"
    }

    fn add_user_key(&mut self, _: &[u8], _: &[u8], _: EntryType, _: u64, _: u64) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self, properties: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
        let mut index_type = Vec::new();
        put_fixed32(&mut index_type, self.index_type as u32);
        properties.insert(names::INDEX_TYPE.to_string(), index_type);
        properties.insert(
            names::WHOLE_KEY_FILTERING.to_string(),
            vec![if self.whole_key_filtering { b'1' } else { b'0' }],
        );
        properties.insert(
            names::PREFIX_FILTERING.to_string(),
            vec![if self.prefix_filtering { b'1' } else { b'0' }],
        );
        Ok(())
    }
}

/// Asks for compaction when any window of `window_size` consecutive entries
/// holds at least `deletion_trigger` deletions.
pub struct CompactOnDeletionCollector {
    window_size: usize,
    deletion_trigger: usize,
    window: VecDeque<bool>,
    deletions_in_window: usize,
    need_compaction: bool,
}

impl CompactOnDeletionCollector {
    /// Creates a collector. A zero window or trigger disables it.
    pub fn new(window_size: usize, deletion_trigger: usize) -> Self {
        Self {
            window_size,
            deletion_trigger,
            window: VecDeque::with_capacity(window_size),
            deletions_in_window: 0,
            need_compaction: false,
        }
    }
}

impl TablePropertiesCollector for CompactOnDeletionCollector {
    fn name(&self) -> &str {
        "CompactOnDeletionCollector"
    }

    fn add_user_key(&mut self, _: &[u8], _: &[u8], entry_type: EntryType, _: u64, _: u64) -> Result<()> {
        if self.need_compaction || self.window_size == 0 || self.deletion_trigger == 0 {
            return Ok(());
        }
        let is_deletion = matches!(entry_type, EntryType::Delete | EntryType::SingleDelete);
        if self.window.len() == self.window_size && self.window.pop_front() == Some(true) {
            self.deletions_in_window -= 1;
        }
        self.window.push_back(is_deletion);
        if is_deletion {
            self.deletions_in_window += 1;
        }
        if self.deletions_in_window >= self.deletion_trigger {
            self.need_compaction = true;
        }
        Ok(())
    }

    fn finish(&mut self, _properties: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
        Ok(())
    }

    fn need_compact(&self) -> bool {
        self.need_compaction
    }
}

/// Factory for [`CompactOnDeletionCollector`].
#[derive(Debug, Clone)]
pub struct CompactOnDeletionCollectorFactory {
    window_size: usize,
    deletion_trigger: usize,
}

impl CompactOnDeletionCollectorFactory {
    /// Collectors created will use these thresholds.
    pub fn new(window_size: usize, deletion_trigger: usize) -> Self {
        Self {
            window_size,
            deletion_trigger,
        }
    }
}

impl TablePropertiesCollectorFactory for CompactOnDeletionCollectorFactory {
    fn name(&self) -> &str {
        "CompactOnDeletionCollector"
    }

    fn create_collector(&self) -> Box<dyn TablePropertiesCollector> {
        Box::new(CompactOnDeletionCollector::new(self.window_size, self.deletion_trigger))
    }
}
