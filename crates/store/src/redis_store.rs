//! Redis-backed customer and segment store for multi-node deployments.
//!
//! Key layout under the configured prefix `p`:
//!
//! * `p:customer:{id}` / `p:segment:{id}`: JSON records
//! * `p:customers` / `p:segments`: id sets used for full scans
//! * `p:segment_names`: name -> id hash (uniqueness via HSETNX)
//! * `p:audience`: id -> audience size hash (HINCRBY for deltas)
//!
//! The audience size lives outside the segment JSON, so rewriting a segment
//! definition never clobbers a concurrent increment. Audience writes check
//! segment membership inside the same Lua script, and membership stripping
//! swaps customer records with compare-and-set.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use audience_core::config::RedisConfig;
use audience_core::error::{AudienceError, AudienceResult};
use audience_core::types::{Customer, Segment};
use audience_segmentation::{CustomerStore, Predicate, SegmentStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Attempts per customer before a contended compare-and-set gives up.
const MAX_SWAP_ATTEMPTS: usize = 8;

/// KEYS[1] segment id set, KEYS[2] audience hash; ARGV[1] id, ARGV[2] delta.
const INCREMENT_IF_LIVE: &str = r"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 0 then
  return false
end
return redis.call('HINCRBY', KEYS[2], ARGV[1], ARGV[2])
";

/// KEYS[1] segment id set, KEYS[2] audience hash; ARGV[1] id, ARGV[2] size.
const SET_IF_LIVE: &str = r"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
return 1
";

/// KEYS[1] record key; ARGV[1] expected JSON, ARGV[2] replacement JSON.
const COMPARE_AND_SET: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    batch_size: usize,
    increment_if_live: redis::Script,
    set_if_live: redis::Script,
    compare_and_set: redis::Script,
}

fn store_err(e: redis::RedisError) -> AudienceError {
    AudienceError::Store(e.to_string())
}

impl RedisStore {
    /// Connect to Redis and verify connectivity with a PING.
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, prefix = %config.key_prefix, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {url}"))??;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            batch_size: config.scan_batch_size.max(1),
            increment_if_live: redis::Script::new(INCREMENT_IF_LIVE),
            set_if_live: redis::Script::new(SET_IF_LIVE),
            compare_and_set: redis::Script::new(COMPARE_AND_SET),
        })
    }

    fn customer_key(&self, id: Uuid) -> String {
        format!("{}:customer:{id}", self.prefix)
    }

    fn customers_key(&self) -> String {
        format!("{}:customers", self.prefix)
    }

    fn segment_key(&self, id: Uuid) -> String {
        format!("{}:segment:{id}", self.prefix)
    }

    fn segments_key(&self) -> String {
        format!("{}:segments", self.prefix)
    }

    fn names_key(&self) -> String {
        format!("{}:segment_names", self.prefix)
    }

    fn audience_key(&self) -> String {
        format!("{}:audience", self.prefix)
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> AudienceResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await.map_err(store_err)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AudienceResult<Option<T>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(key).await.map_err(store_err)?;
        data.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(AudienceError::from)
    }

    /// Load every record whose id is in `set_key`, paging MGET calls.
    async fn load_all<T: DeserializeOwned>(
        &self,
        set_key: &str,
        key_for: impl Fn(&str) -> String,
    ) -> AudienceResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(set_key).await.map_err(store_err)?;
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let keys: Vec<String> = chunk.iter().map(|id| key_for(id.as_str())).collect();
            let values: Vec<Option<String>> = conn.mget(&keys).await.map_err(store_err)?;
            for json in values.into_iter().flatten() {
                records.push(serde_json::from_str(&json)?);
            }
        }
        debug!(set = set_key, records = records.len(), "Loaded records from Redis");
        Ok(records)
    }

    /// Remove `segment_id` from one customer record. Retries when the
    /// record changes between the read and the swap.
    async fn strip_segment(
        &self,
        customer_id: Uuid,
        segment_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AudienceResult<bool> {
        let key = self.customer_key(customer_id);
        let mut conn = self.conn.clone();
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let raw: Option<String> = conn.get(&key).await.map_err(store_err)?;
            let Some(raw) = raw else {
                return Ok(false);
            };
            let mut customer: Customer = serde_json::from_str(&raw)?;
            if !customer.segments.remove(&segment_id) {
                return Ok(false);
            }
            customer.updated_at = now;
            let swapped: i64 = self
                .compare_and_set
                .key(&key)
                .arg(&raw)
                .arg(serde_json::to_string(&customer)?)
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;
            if swapped == 1 {
                return Ok(true);
            }
            debug!(customer_id = %customer_id, "Customer changed while removing segment, retrying");
        }
        Err(AudienceError::Store(format!(
            "customer {customer_id} kept changing while removing segment {segment_id}"
        )))
    }

    async fn audience_size(&self, id: Uuid) -> AudienceResult<i64> {
        let mut conn = self.conn.clone();
        let size: Option<i64> = conn
            .hget(self.audience_key(), id.to_string())
            .await
            .map_err(store_err)?;
        Ok(size.unwrap_or(0))
    }
}

#[async_trait]
impl CustomerStore for RedisStore {
    async fn insert_customer(&self, customer: Customer) -> AudienceResult<()> {
        self.put_json(&self.customer_key(customer.id), &customer).await?;
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.customers_key(), customer.id.to_string())
            .await
            .map_err(store_err)
    }

    async fn get_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>> {
        self.get_json(&self.customer_key(id)).await
    }

    async fn update_customer(&self, customer: Customer) -> AudienceResult<()> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(self.customer_key(customer.id))
            .await
            .map_err(store_err)?;
        if !exists {
            return Err(AudienceError::not_found("customer", customer.id));
        }
        self.put_json(&self.customer_key(customer.id), &customer).await
    }

    async fn delete_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>> {
        let existing: Option<Customer> = self.get_json(&self.customer_key(id)).await?;
        if existing.is_some() {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(self.customer_key(id))
                .await
                .map_err(store_err)?;
            conn.srem::<_, _, ()>(self.customers_key(), id.to_string())
                .await
                .map_err(store_err)?;
        }
        Ok(existing)
    }

    async fn list_customers(&self) -> AudienceResult<Vec<Customer>> {
        let prefix = self.prefix.clone();
        let mut customers: Vec<Customer> = self
            .load_all(&self.customers_key(), |id| format!("{prefix}:customer:{id}"))
            .await?;
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(customers)
    }

    async fn count_matching(&self, predicate: &Predicate) -> AudienceResult<u64> {
        let customers = self.list_customers().await?;
        Ok(customers.iter().filter(|c| predicate.matches(c)).count() as u64)
    }

    async fn remove_segment_from_all(&self, segment_id: Uuid) -> AudienceResult<u64> {
        let now = chrono::Utc::now();
        let mut touched = 0;
        for customer in self.list_customers().await? {
            if customer.segments.contains(&segment_id)
                && self.strip_segment(customer.id, segment_id, now).await?
            {
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl SegmentStore for RedisStore {
    async fn insert_segment(&self, segment: Segment) -> AudienceResult<()> {
        let mut conn = self.conn.clone();
        let claimed: bool = conn
            .hset_nx(self.names_key(), &segment.name, segment.id.to_string())
            .await
            .map_err(store_err)?;
        if !claimed {
            return Err(AudienceError::DuplicateName(segment.name));
        }

        self.put_json(&self.segment_key(segment.id), &segment).await?;
        conn.sadd::<_, _, ()>(self.segments_key(), segment.id.to_string())
            .await
            .map_err(store_err)?;
        conn.hset::<_, _, _, ()>(self.audience_key(), segment.id.to_string(), segment.audience_size)
            .await
            .map_err(store_err)
    }

    async fn get_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>> {
        let Some(mut segment) = self.get_json::<Segment>(&self.segment_key(id)).await? else {
            return Ok(None);
        };
        segment.audience_size = self.audience_size(id).await?;
        Ok(Some(segment))
    }

    async fn find_segment_by_name(&self, name: &str) -> AudienceResult<Option<Segment>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.hget(self.names_key(), name).await.map_err(store_err)?;
        match id.and_then(|raw| Uuid::parse_str(&raw).ok()) {
            Some(id) => self.get_segment(id).await,
            None => Ok(None),
        }
    }

    async fn update_segment(&self, segment: Segment) -> AudienceResult<()> {
        let existing: Segment = self
            .get_json(&self.segment_key(segment.id))
            .await?
            .ok_or_else(|| AudienceError::not_found("segment", segment.id))?;

        if existing.name != segment.name {
            let mut conn = self.conn.clone();
            let claimed: bool = conn
                .hset_nx(self.names_key(), &segment.name, segment.id.to_string())
                .await
                .map_err(store_err)?;
            if !claimed {
                let owner: Option<String> = conn
                    .hget(self.names_key(), &segment.name)
                    .await
                    .map_err(store_err)?;
                if owner.as_deref() != Some(segment.id.to_string().as_str()) {
                    return Err(AudienceError::DuplicateName(segment.name));
                }
            }
            conn.hdel::<_, _, ()>(self.names_key(), &existing.name)
                .await
                .map_err(store_err)?;
        }

        self.put_json(&self.segment_key(segment.id), &segment).await
    }

    async fn delete_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>> {
        let existing = self.get_segment(id).await?;
        if let Some(segment) = &existing {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(self.segment_key(id))
                .await
                .map_err(store_err)?;
            conn.srem::<_, _, ()>(self.segments_key(), id.to_string())
                .await
                .map_err(store_err)?;
            conn.hdel::<_, _, ()>(self.names_key(), &segment.name)
                .await
                .map_err(store_err)?;
            conn.hdel::<_, _, ()>(self.audience_key(), id.to_string())
                .await
                .map_err(store_err)?;
        }
        Ok(existing)
    }

    async fn list_segments(&self) -> AudienceResult<Vec<Segment>> {
        let prefix = self.prefix.clone();
        let mut segments: Vec<Segment> = self
            .load_all(&self.segments_key(), |id| format!("{prefix}:segment:{id}"))
            .await?;

        let mut conn = self.conn.clone();
        let sizes: HashMap<String, i64> = conn
            .hgetall(self.audience_key())
            .await
            .map_err(store_err)?;
        for segment in &mut segments {
            segment.audience_size = sizes.get(&segment.id.to_string()).copied().unwrap_or(0);
        }
        segments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(segments)
    }

    async fn set_audience_size(&self, id: Uuid, size: i64) -> AudienceResult<()> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .set_if_live
            .key(self.segments_key())
            .key(self.audience_key())
            .arg(id.to_string())
            .arg(size)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        if written == 0 {
            return Err(AudienceError::not_found("segment", id));
        }
        Ok(())
    }

    async fn increment_audience_size(&self, id: Uuid, delta: i64) -> AudienceResult<i64> {
        let mut conn = self.conn.clone();
        let size: Option<i64> = self
            .increment_if_live
            .key(self.segments_key())
            .key(self.audience_key())
            .arg(id.to_string())
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        size.ok_or_else(|| AudienceError::not_found("segment", id))
    }

    async fn ping(&self) -> AudienceResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
