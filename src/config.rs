use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackConfig {
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_mem_size: String,
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_disk_size: String,
    pub pack_decode_cache_path: PathBuf,
    pub clean_cache_after_decode: bool,
    pub channel_message_size: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_decode_mem_size: "4G".to_string(),
            pack_decode_disk_size: "20%".to_string(),
            pack_decode_cache_path: PathBuf::from("pack_decode_cache"),
            clean_cache_after_decode: true,
            channel_message_size: 1_000_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LfsConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Object cache bounds (spec §6 "cache max-count" / "cache max-bytes")
/// plus the optional per-entry TTL from §4.3a.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    pub max_count: usize,
    pub max_bytes: usize,
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_count: 10_000,
            max_bytes: 256 * 1024 * 1024,
            ttl_seconds: None,
        }
    }
}

/// Object-store-level configuration: cache bounds plus whether metrics
/// collection is enabled (spec §4.3 "Metrics (opt-in)").
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StoreConfig {
    pub cache: CacheConfig,
    pub metrics_enabled: bool,
}

/// Tiered-migration configuration (spec §4.5): how many candidates a
/// selection pass considers, and the default per-SHA lock timeout used
/// unless a call overrides it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MigrationConfig {
    pub candidate_batch_size: usize,
    pub lock_timeout_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            candidate_batch_size: 100,
            lock_timeout_ms: 5_000,
        }
    }
}

fn string_or_usize<'deserialize, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}
