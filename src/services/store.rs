use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::models::api::ControlAction;
use crate::models::job::{JobKey, JobRecord, Revision};

const RECORD_PATTERN: &str = "*_job_*";
const GENERATION_KEY: &str = "bulk_jobs:generation";
const SCAN_BATCH: usize = 100;

/// Compare-and-set on the record's embedded version and generation.
/// Version 0 means "absent".
const SAVE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local expected = tonumber(ARGV[1])
if current then
  local stored = cjson.decode(current)
  if (stored['version'] or 0) ~= expected then
    return 0
  end
  if (stored['generation'] or 0) ~= tonumber(ARGV[3]) then
    return 0
  end
elseif expected ~= 0 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// A pending cancel is never replaced by a weaker command.
const WRITE_CONTROL_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == 'cancel' and ARGV[1] ~= 'cancel' then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

const CLEAR_CONTROL_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Durable home of job records and their control channel.
///
/// Writes of the record are conditional on `JobRecord::version` so two actors
/// advancing the same job cannot silently overwrite each other.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError>;

    /// Persist `record` if the stored record is still at `record.revision()`
    /// (version 0 when nothing is stored). Bumps `record.version` on success
    /// and returns [`StoreError::Conflict`] otherwise.
    async fn save(&self, record: &mut JobRecord) -> Result<(), StoreError> {
        let expected = record.revision();
        self.save_over(record, expected).await
    }

    /// Persist `record` in place of the stored record at `expected`, which may
    /// belong to an earlier generation. `record.version` becomes
    /// `expected.version + 1` on success.
    async fn save_over(&self, record: &mut JobRecord, expected: Revision)
        -> Result<(), StoreError>;

    /// Allocate a generation number no earlier submission has used.
    async fn next_generation(&self) -> Result<u64, StoreError>;

    /// Remove the record and its control channel. Returns whether a record existed.
    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError>;

    async fn read_control(&self, key: &JobKey) -> Result<Option<ControlAction>, StoreError>;

    /// Returns `false` when a pending cancel prevented the write.
    async fn write_control(&self, key: &JobKey, action: ControlAction)
        -> Result<bool, StoreError>;

    /// Clear the control channel only if it still holds `action`.
    async fn clear_control(&self, key: &JobKey, action: ControlAction) -> Result<(), StoreError>;

    async fn list_keys(&self) -> Result<Vec<JobKey>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Open the configured store: Redis when a URL is given, otherwise a
/// process-local store whose contents die with the process.
pub async fn connect(redis_url: Option<&str>) -> Result<Arc<dyn JobStore>, StoreError> {
    match redis_url {
        Some(url) => {
            let store = RedisJobStore::connect(url).await?;
            store.health_check().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("REDIS_URL not set; durable jobs will not survive a restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

/// Redis-backed job store.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    save_script: redis::Script,
    write_control_script: redis::Script,
    clear_control_script: redis::Script,
}

impl RedisJobStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            save_script: redis::Script::new(SAVE_SCRIPT),
            write_control_script: redis::Script::new(WRITE_CONTROL_SCRIPT),
            clear_control_script: redis::Script::new(CLEAR_CONTROL_SCRIPT),
        })
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn load(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.record_key()).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn save_over(
        &self,
        record: &mut JobRecord,
        expected: Revision,
    ) -> Result<(), StoreError> {
        let previous = record.version;
        record.version = expected.version + 1;
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(e) => {
                record.version = previous;
                return Err(e.into());
            }
        };

        let mut conn = self.conn.clone();
        let written: Result<i64, redis::RedisError> = self
            .save_script
            .key(record.key().record_key())
            .arg(expected.version)
            .arg(payload)
            .arg(expected.generation)
            .invoke_async(&mut conn)
            .await;

        match written {
            Ok(1) => Ok(()),
            Ok(_) => {
                record.version = previous;
                Err(StoreError::Conflict(record.key().to_string()))
            }
            Err(e) => {
                record.version = previous;
                Err(e.into())
            }
        }
    }

    async fn next_generation(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(GENERATION_KEY, 1u64).await?)
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key.record_key()).await?;
        let _: i64 = conn.del(key.control_key()).await?;
        Ok(removed > 0)
    }

    async fn read_control(&self, key: &JobKey) -> Result<Option<ControlAction>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.control_key()).await?;
        Ok(raw.and_then(|value| match value.parse() {
            Ok(action) => Some(action),
            Err(_) => {
                tracing::warn!(job = %key, value = %value, "Ignoring unknown control command");
                None
            }
        }))
    }

    async fn write_control(
        &self,
        key: &JobKey,
        action: ControlAction,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .write_control_script
            .key(key.control_key())
            .arg(action.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn clear_control(&self, key: &JobKey, action: ControlAction) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .clear_control_script
            .key(key.control_key())
            .arg(action.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<JobKey>, StoreError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(RECORD_PATTERN)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch.iter().filter_map(|raw| JobKey::from_record_key(raw)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Process-local store with the same conditional-write semantics as Redis.
/// Used when no Redis is configured and in tests.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobKey, JobRecord>>,
    controls: RwLock<HashMap<JobKey, ControlAction>>,
    generation: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save_over(
        &self,
        record: &mut JobRecord,
        expected: Revision,
    ) -> Result<(), StoreError> {
        let key = record.key();
        let mut records = self.records.write().await;
        let matches = match records.get(&key) {
            Some(stored) => stored.revision() == expected,
            None => expected.version == 0,
        };
        if !matches {
            return Err(StoreError::Conflict(key.to_string()));
        }
        record.version = expected.version + 1;
        records.insert(key, record.clone());
        Ok(())
    }

    async fn next_generation(&self) -> Result<u64, StoreError> {
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        self.controls.write().await.remove(key);
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn read_control(&self, key: &JobKey) -> Result<Option<ControlAction>, StoreError> {
        Ok(self.controls.read().await.get(key).copied())
    }

    async fn write_control(
        &self,
        key: &JobKey,
        action: ControlAction,
    ) -> Result<bool, StoreError> {
        let mut controls = self.controls.write().await;
        if controls.get(key) == Some(&ControlAction::Cancel) && action != ControlAction::Cancel {
            return Ok(false);
        }
        controls.insert(key.clone(), action);
        Ok(true)
    }

    async fn clear_control(&self, key: &JobKey, action: ControlAction) -> Result<(), StoreError> {
        let mut controls = self.controls.write().await;
        if controls.get(key) == Some(&action) {
            controls.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<JobKey>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Concurrent write to job {0}")]
    Conflict(String),
}
