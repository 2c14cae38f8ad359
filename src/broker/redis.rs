use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tracing::{debug, warn};

use super::{nack_outcome, Broker, BrokerError, BrokerMessage, Delivery, NackOutcome};
use crate::connection::RedisConnection;

/// Store a message and queue it at the back of its priority band.
///
/// Re-adding an id drops it from its previous band and from the delayed,
/// active and failed sets, and resets its attempt counter.
const ADD: &str = r#"
    local previous = redis.call('GET', KEYS[1])
    if previous then
        local old = tonumber(cjson.decode(previous)['priority'])
        if old then
            redis.call('ZREM', ARGV[4] .. string.format('%d', old), ARGV[1])
        end
    end
    redis.call('SET', KEYS[1], ARGV[2])
    redis.call('HSET', KEYS[2], ARGV[1], 0)
    redis.call('ZREM', KEYS[3], ARGV[1])
    redis.call('SREM', KEYS[4], ARGV[1])
    redis.call('SREM', KEYS[5], ARGV[1])
    local seq = redis.call('INCR', KEYS[7])
    redis.call('ZADD', ARGV[4] .. ARGV[3], seq, ARGV[1])
    redis.call('ZADD', KEYS[6], ARGV[3], ARGV[3])
    return 1
"#;

/// Pop the oldest message of the best non-empty band and mark it active in
/// one step. Empty bands are dropped on the way.
///
/// Returns `{id, message json, attempts made}` or nil when nothing waits.
const RESERVE: &str = r#"
    while true do
        local band = redis.call('ZRANGE', KEYS[1], 0, 0)
        if #band == 0 then
            return false
        end
        local wait = ARGV[2] .. band[1]
        local popped = redis.call('ZPOPMIN', wait)
        if redis.call('ZCARD', wait) == 0 then
            redis.call('ZREM', KEYS[1], band[1])
        end
        if #popped > 0 then
            local id = popped[1]
            redis.call('SADD', KEYS[2], id)
            local message = redis.call('GET', ARGV[1] .. id)
            local attempts = redis.call('HGET', KEYS[3], id)
            return {id, message or '', attempts or '0'}
        end
    end
"#;

/// Move due delayed messages to the back of their priority band.
const PROMOTE_DELAYED: &str = r#"
    local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
    local promoted = 0
    for _, id in ipairs(due) do
        redis.call('ZREM', KEYS[1], id)
        local raw = redis.call('GET', ARGV[2] .. id)
        if raw then
            local priority = string.format('%d', tonumber(cjson.decode(raw)['priority']) or 0)
            local seq = redis.call('INCR', KEYS[3])
            redis.call('ZADD', ARGV[3] .. priority, seq, id)
            redis.call('ZADD', KEYS[2], priority, priority)
            promoted = promoted + 1
        end
    end
    return promoted
"#;

/// Redis-backed broker
///
/// Key layout under `{prefix}:{queue}`:
///
/// - `msg:{id}`: message JSON
/// - `bands`: sorted set of non-empty priorities, scored by priority
/// - `wait:{priority}`: sorted set per priority, scored by arrival sequence
/// - `seq`: arrival counter
/// - `delayed`: sorted set scored by due time in ms
/// - `active`: set of reserved ids
/// - `failed`: set of ids whose attempt budget is spent
/// - `attempts`: hash of attempts made per id
///
/// Every score is an integer well inside the exact range of a Redis score,
/// so arrival order within a band holds for any priority value.
pub struct RedisBroker {
    connection: RwLock<Option<RedisConnection>>,
    prefix: String,
}

impl RedisBroker {
    pub fn new(
        connection: RedisConnection,
        key_prefix: impl AsRef<str>,
        queue_name: impl AsRef<str>,
    ) -> Self {
        Self {
            connection: RwLock::new(Some(connection)),
            prefix: format!("{}:{}", key_prefix.as_ref(), queue_name.as_ref()),
        }
    }

    fn message_key_prefix(&self) -> String {
        format!("{}:msg:", self.prefix)
    }

    fn message_key(&self, job_id: &str) -> String {
        format!("{}:msg:{}", self.prefix, job_id)
    }

    fn wait_key_prefix(&self) -> String {
        format!("{}:wait:", self.prefix)
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// The live connection, or [`BrokerError::Closed`] after [`Broker::close`].
    fn connection(&self) -> Result<RedisConnection, BrokerError> {
        self.connection
            .read()
            .map_err(|e| BrokerError::operation_failed("connection lock", e.to_string()))?
            .clone()
            .ok_or(BrokerError::Closed)
    }

    async fn load_message(
        &self,
        connection: &RedisConnection,
        job_id: &str,
    ) -> Result<BrokerMessage, BrokerError> {
        let mut conn = connection.manager();
        let raw: Option<String> = connection
            .with_timeout(redis::cmd("GET").arg(self.message_key(job_id)).query_async(&mut conn))
            .await?;
        let raw = raw.ok_or_else(|| BrokerError::message_not_found(job_id))?;
        decode(&raw)
    }
}

fn decode(raw: &str) -> Result<BrokerMessage, BrokerError> {
    serde_json::from_str(raw).map_err(|e| {
        BrokerError::serialization_with_source("Failed to deserialize message", Box::new(e))
    })
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(self.connection()?.ping().await?)
    }

    async fn add(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let connection = self.connection()?;
        let json = serde_json::to_string(&message).map_err(|e| {
            BrokerError::serialization_with_source("Failed to serialize message", Box::new(e))
        })?;
        let id = message.job_id.as_str();

        let script = redis::Script::new(ADD);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.message_key(id))
            .key(self.key("attempts"))
            .key(self.key("delayed"))
            .key(self.key("failed"))
            .key(self.key("active"))
            .key(self.key("bands"))
            .key(self.key("seq"))
            .arg(id)
            .arg(json)
            .arg(message.priority.value())
            .arg(self.wait_key_prefix());

        let mut conn = connection.manager();
        let _: i32 = connection
            .with_timeout(invocation.invoke_async(&mut conn))
            .await?;

        debug!(job_id = %id, priority = %message.priority, "Message added");
        Ok(())
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<usize, BrokerError> {
        let connection = self.connection()?;
        let script = redis::Script::new(PROMOTE_DELAYED);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("delayed"))
            .key(self.key("bands"))
            .key(self.key("seq"))
            .arg(now.timestamp_millis())
            .arg(self.message_key_prefix())
            .arg(self.wait_key_prefix());

        let mut conn = connection.manager();
        let promoted: usize = connection
            .with_timeout(invocation.invoke_async(&mut conn))
            .await?;
        Ok(promoted)
    }

    async fn reserve(&self) -> Result<Option<Delivery>, BrokerError> {
        let connection = self.connection()?;
        let script = redis::Script::new(RESERVE);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("bands"))
            .key(self.key("active"))
            .key(self.key("attempts"))
            .arg(self.message_key_prefix())
            .arg(self.wait_key_prefix());

        let mut conn = connection.manager();
        let reserved: Option<Vec<String>> = connection
            .with_timeout(invocation.invoke_async(&mut conn))
            .await?;

        let Some(fields) = reserved else {
            return Ok(None);
        };
        let [job_id, raw, attempts] = <[String; 3]>::try_from(fields).map_err(|_| {
            BrokerError::operation_failed("reserve", "unexpected script reply")
        })?;

        if raw.is_empty() {
            warn!(job_id = %job_id, "Reserved id has no stored message, dropping");
            let _: () = connection
                .with_timeout(
                    redis::cmd("SREM")
                        .arg(self.key("active"))
                        .arg(&job_id)
                        .query_async(&mut conn),
                )
                .await?;
            return Err(BrokerError::message_not_found(job_id));
        }

        Ok(Some(Delivery {
            message: decode(&raw)?,
            attempts_made: attempts.parse().unwrap_or(0),
        }))
    }

    async fn ack(&self, job_id: &str) -> Result<(), BrokerError> {
        let connection = self.connection()?;
        let mut conn = connection.manager();
        let _: () = connection
            .with_timeout(
                redis::pipe()
                    .atomic()
                    .srem(self.key("active"), job_id)
                    .ignore()
                    .del(self.message_key(job_id))
                    .ignore()
                    .hdel(self.key("attempts"), job_id)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: &str) -> Result<NackOutcome, BrokerError> {
        let connection = self.connection()?;
        let message = self.load_message(&connection, job_id).await?;

        let mut conn = connection.manager();
        let attempts_made: u32 = connection
            .with_timeout(
                redis::cmd("HINCRBY")
                    .arg(self.key("attempts"))
                    .arg(job_id)
                    .arg(1)
                    .query_async(&mut conn),
            )
            .await?;

        let outcome = nack_outcome(&message, attempts_made, Utc::now());
        let mut pipe = redis::pipe();
        pipe.atomic().srem(self.key("active"), job_id).ignore();
        match outcome {
            NackOutcome::Retrying { retry_at, .. } => {
                pipe.zadd(self.key("delayed"), job_id, retry_at.timestamp_millis())
                    .ignore();
            }
            NackOutcome::Exhausted { .. } => {
                pipe.sadd(self.key("failed"), job_id).ignore();
            }
        }
        let _: () = connection.with_timeout(pipe.query_async(&mut conn)).await?;

        debug!(job_id = %job_id, attempts_made, error = %error, "Message nacked");
        Ok(outcome)
    }

    /// Drop this broker's connection handle. The underlying Redis connection
    /// closes once the job store sharing it is dropped as well.
    async fn close(&self) -> Result<(), BrokerError> {
        let released = self
            .connection
            .write()
            .map_err(|e| BrokerError::operation_failed("connection lock", e.to_string()))?
            .take();
        if released.is_some() {
            debug!("Broker connection released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::core::{Job, Priority};
    use crate::processing::BackoffPolicy;
    use std::time::Duration;

    async fn create_test_broker() -> Option<RedisBroker> {
        let config = BrokerConfig::default().with_key_prefix(format!(
            "jobforge_test_{}",
            uuid::Uuid::new_v4().simple()
        ));
        match RedisConnection::connect(&config, Duration::from_millis(500)).await {
            Ok(connection) => Some(RedisBroker::new(
                connection,
                &config.key_prefix,
                &config.queue_name,
            )),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn test_redis_broker_round_trip() {
        let broker = match create_test_broker().await {
            Some(broker) => broker,
            None => {
                println!("Skipping Redis test - Redis not available");
                return;
            }
        };

        let job = Job::new("t1", Priority::DEFAULT, 2);
        let message = BrokerMessage::for_job(&job, BackoffPolicy::exponential(1));
        broker.add(message.clone()).await.unwrap();

        let delivery = broker.reserve().await.unwrap().unwrap();
        assert_eq!(delivery.message, message);
        assert_eq!(delivery.attempts_made, 0);

        let outcome = broker.nack(&job.id, "boom").await.unwrap();
        assert!(matches!(outcome, NackOutcome::Retrying { attempts_made: 1, .. }));

        let promoted = broker
            .promote_delayed(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(promoted, 1);

        let delivery = broker.reserve().await.unwrap().unwrap();
        assert_eq!(delivery.attempts_made, 1);
        let outcome = broker.nack(&job.id, "boom").await.unwrap();
        assert_eq!(outcome, NackOutcome::Exhausted { attempts_made: 2 });

        assert!(broker.reserve().await.unwrap().is_none());
        broker.close().await.unwrap();
        assert!(matches!(broker.ping().await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn test_redis_broker_keeps_arrival_order_at_high_priority() {
        let broker = match create_test_broker().await {
            Some(broker) => broker,
            None => {
                println!("Skipping Redis test - Redis not available");
                return;
            }
        };

        let backoff = BackoffPolicy::exponential(1);
        let low: Vec<Job> = (0..3).map(|_| Job::new("t1", Priority(5_000), 3)).collect();
        for job in &low {
            broker.add(BrokerMessage::for_job(job, backoff)).await.unwrap();
        }
        let urgent = Job::new("t2", Priority::MANUAL_RETRY, 3);
        broker.add(BrokerMessage::for_job(&urgent, backoff)).await.unwrap();

        let first = broker.reserve().await.unwrap().unwrap();
        assert_eq!(first.message.job_id, urgent.id);
        for job in &low {
            let delivery = broker.reserve().await.unwrap().unwrap();
            assert_eq!(delivery.message.job_id, job.id);
        }
        assert!(broker.reserve().await.unwrap().is_none());

        broker.close().await.unwrap();
        assert!(matches!(broker.reserve().await, Err(BrokerError::Closed)));
        assert!(matches!(broker.ack(&urgent.id).await, Err(BrokerError::Closed)));
    }
}
