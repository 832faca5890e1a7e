//! RocksDB-backed version repository.
//!
//! Column families:
//! - `versions` : `<report_id:16><version_number:8 BE>` → LZ4(bincode(Version))
//! - `branches` : `<report_id:16><name:utf8>`           → LZ4(bincode(Branch))
//! - `heads`    : `<report_id:16>`                      → current version id (16 bytes)
//!
//! Big-endian version numbers make a prefix scan return a report's versions
//! in numeric order. Every commit is a single `WriteBatch`.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 3

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use folio_core::{Branch, Version};

use super::{HistoryBatch, StoreError, StoredHistory, VersionRepository};

const CF_VERSIONS: &str = "versions";
const CF_BRANCHES: &str = "branches";
const CF_HEADS: &str = "heads";

const COLUMN_FAMILIES: &[&str] = &[CF_VERSIONS, CF_BRANCHES, CF_HEADS];

/// Length of the report-id key prefix.
const PREFIX_LEN: usize = 16;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every commit (default: true; versions are the durable record)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 128 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Durable [`VersionRepository`] on RocksDB.
pub struct RocksRepository {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksRepository {
    /// Open (or create) the repository at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("version repository opened at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_VERSIONS | CF_BRANCHES => {
                // Values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_LEN));
            }
            CF_HEADS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn version_key(report_id: Uuid, version_number: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(PREFIX_LEN + 8);
        key.extend_from_slice(report_id.as_bytes());
        key.extend_from_slice(&version_number.to_be_bytes());
        key
    }

    fn branch_key(report_id: Uuid, name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(PREFIX_LEN + name.len());
        key.extend_from_slice(report_id.as_bytes());
        key.extend_from_slice(name.as_bytes());
        key
    }

    /// Decode every value under the report prefix of a column family.
    fn scan_prefix<T: DeserializeOwned>(&self, cf_name: &str, report_id: Uuid) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        let prefix = report_id.as_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if key.len() < PREFIX_LEN || &key[..PREFIX_LEN] != prefix {
                break;
            }
            records.push(decode_record(&value)?);
        }
        Ok(records)
    }
}

impl VersionRepository for RocksRepository {
    fn load(&self, report_id: Uuid) -> Result<StoredHistory, StoreError> {
        let versions: Vec<Version> = self.scan_prefix(CF_VERSIONS, report_id)?;
        let branches: Vec<Branch> = self.scan_prefix(CF_BRANCHES, report_id)?;

        let heads = self.cf(CF_HEADS)?;
        let current = match self.db.get_cf(heads, report_id.as_bytes())? {
            Some(bytes) => Some(Uuid::from_slice(&bytes).map_err(|e| {
                StoreError::DeserializationError(format!("invalid head for {report_id}: {e}"))
            })?),
            None => None,
        };

        log::debug!(
            "loaded report {report_id}: {} versions, {} branches",
            versions.len(),
            branches.len()
        );
        Ok(StoredHistory {
            versions,
            branches,
            current,
        })
    }

    fn commit(&self, report_id: Uuid, batch: &HistoryBatch) -> Result<(), StoreError> {
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_branches = self.cf(CF_BRANCHES)?;
        let cf_heads = self.cf(CF_HEADS)?;

        let mut write = WriteBatch::default();
        for version in &batch.versions {
            write.put_cf(
                cf_versions,
                Self::version_key(report_id, version.version_number),
                encode_record(version)?,
            );
        }
        for branch in &batch.branches {
            write.put_cf(
                cf_branches,
                Self::branch_key(report_id, &branch.name),
                encode_record(branch)?,
            );
        }
        if let Some(current) = batch.current {
            write.put_cf(cf_heads, report_id.as_bytes(), current.as_bytes());
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(write, &write_opts)?;
        Ok(())
    }

    fn reports(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_HEADS)?;
        let mut reports = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() == PREFIX_LEN {
                let id = Uuid::from_slice(&key)
                    .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
                reports.push(id);
            }
        }
        Ok(reports)
    }
}

fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode_record<T: DeserializeOwned>(value: &[u8]) -> Result<T, StoreError> {
    let bytes = lz4_flex::decompress_size_prepended(value)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (record, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(record)
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
