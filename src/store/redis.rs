//! Redis counter store.
//!
//! Implements the atomic consume as an embedded Lua script: increment,
//! TTL bookkeeping, cap check, and block extension all run server-side in
//! one `EVALSHA` round trip.

use fred::prelude::*;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{outcome_from_reply, ConsumeOutcome, CounterStore, StoreError, WindowParams};

/// Atomic fixed-window consume.
///
/// KEYS[1]: counter key
/// ARGV[1]: window in milliseconds
/// ARGV[2]: points
/// ARGV[3]: block duration in milliseconds (0 = none)
///
/// Returns `{count, allowed, pttl}`. The TTL is extended to the block
/// duration only on the first consumption that crosses the limit, so
/// rejected traffic does not push the block forward indefinitely.
const CONSUME_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local points = tonumber(ARGV[2])
if count > points then
  local block = tonumber(ARGV[3])
  if block > 0 and count == points + 1 then
    redis.call('PEXPIRE', KEYS[1], block)
  end
  return {count, 0, redis.call('PTTL', KEYS[1])}
end
return {count, 1, redis.call('PTTL', KEYS[1])}
";

/// Lua script return code for an allowed consumption.
const SCRIPT_ALLOWED: i64 = 1;

/// Counter store backed by Redis.
///
/// Call [`RedisCounterStore::init`] after creation to load the Lua script,
/// or use [`RedisCounterStore::connect`] which does both.
#[derive(Clone)]
pub struct RedisCounterStore {
    redis: Client,
    script_sha: std::sync::Arc<RwLock<String>>,
}

impl RedisCounterStore {
    /// Creates a store around an existing connected client.
    pub fn new(redis: Client) -> Self {
        Self {
            redis,
            script_sha: std::sync::Arc::new(RwLock::new(String::new())),
        }
    }

    /// Connects to Redis and loads the consume script.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(redis_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client
            .wait_for_connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        info!("Connected to Redis counter store");

        let mut store = Self::new(client);
        store.init().await?;
        Ok(store)
    }

    /// Loads the consume script into Redis.
    ///
    /// Must be called before `consume` when constructed via `new`.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        self.load_script().await
    }

    /// Loads or reloads the Lua script into Redis.
    ///
    /// Called during init and when NOSCRIPT errors are encountered
    /// (e.g. after a Redis restart or SCRIPT FLUSH).
    async fn load_script(&self) -> Result<(), StoreError> {
        let sha: String = self
            .redis
            .script_load(CONSUME_SCRIPT)
            .await
            .map_err(|e| StoreError::Script(e.to_string()))?;
        info!(sha = %sha, "Consume script loaded into Redis");

        let mut script_sha = self.script_sha.write().await;
        *script_sha = sha;
        Ok(())
    }

    /// Checks if an error is a NOSCRIPT error (script not found in Redis).
    fn is_noscript_error(error: &Error) -> bool {
        error.to_string().contains("NOSCRIPT")
    }

    async fn evalsha_consume(
        &self,
        sha: &str,
        key: &str,
        params: &WindowParams,
    ) -> Result<Vec<i64>, Error> {
        let args = vec![
            params.window.as_millis().to_string(),
            params.points.to_string(),
            params
                .block
                .map(|b| b.as_millis())
                .unwrap_or(0)
                .to_string(),
        ];
        self.redis.evalsha(sha, vec![key], args).await
    }
}

/// Decodes the `{count, allowed, pttl}` reply of the consume script.
///
/// PTTL returns -1/-2 sentinels for missing expiry; those clamp to zero.
fn decode_reply(reply: &[i64], params: &WindowParams) -> Result<ConsumeOutcome, StoreError> {
    if reply.len() != 3 {
        return Err(StoreError::Reply(format!(
            "expected 3 integers, got {}",
            reply.len()
        )));
    }

    let count = u64::try_from(reply[0])
        .map_err(|_| StoreError::Reply(format!("negative count: {}", reply[0])))?;
    let allowed = reply[1] == SCRIPT_ALLOWED;
    let ttl_ms = reply[2].max(0) as u64;

    Ok(outcome_from_reply(
        count,
        allowed,
        std::time::Duration::from_millis(ttl_ms),
        params,
    ))
}

#[async_trait::async_trait]
impl CounterStore for RedisCounterStore {
    #[tracing::instrument(skip(self, params))]
    async fn consume(
        &self,
        key: &str,
        params: &WindowParams,
    ) -> Result<ConsumeOutcome, StoreError> {
        let sha = self.script_sha.read().await.clone();

        let result = match self.evalsha_consume(&sha, key, params).await {
            Ok(reply) => reply,
            Err(e) if Self::is_noscript_error(&e) => {
                warn!("NOSCRIPT error, reloading consume script");
                self.load_script().await?;

                // Retry once with the new SHA
                let new_sha = self.script_sha.read().await.clone();
                self.evalsha_consume(&new_sha, key, params)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "Consume failed after script reload");
                        StoreError::Script(e.to_string())
                    })?
            }
            Err(e) => {
                warn!(error = %e, "Redis consume call failed");
                return Err(StoreError::Connection(e.to_string()));
            }
        };

        decode_reply(&result, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WindowParams {
        WindowParams {
            points: 5,
            window: std::time::Duration::from_secs(60),
            block: None,
        }
    }

    #[test]
    fn test_decode_allowed_reply() {
        let outcome = decode_reply(&[3, 1, 42_000], &params()).unwrap();
        match outcome {
            ConsumeOutcome::Allowed {
                limit,
                remaining,
                reset_after,
            } => {
                assert_eq!(limit, 5);
                assert_eq!(remaining, 2);
                assert_eq!(reset_after, std::time::Duration::from_millis(42_000));
            }
            other => panic!("expected Allowed, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejected_reply() {
        let outcome = decode_reply(&[6, 0, 30_000], &params()).unwrap();
        match outcome {
            ConsumeOutcome::Rejected { retry_after, .. } => {
                assert_eq!(retry_after, std::time::Duration::from_millis(30_000));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_clamps_pttl_sentinels() {
        // PTTL returns -1 (no expiry) and -2 (missing key) sentinels.
        for sentinel in [-1, -2] {
            let outcome = decode_reply(&[1, 1, sentinel], &params()).unwrap();
            match outcome {
                ConsumeOutcome::Allowed { reset_after, .. } => {
                    assert_eq!(reset_after, std::time::Duration::ZERO);
                }
                other => panic!("expected Allowed, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length_reply() {
        let err = decode_reply(&[1, 1], &params()).unwrap_err();
        assert!(matches!(err, StoreError::Reply(ref msg) if msg.contains("got 2")));

        let err = decode_reply(&[1, 1, 0, 0], &params()).unwrap_err();
        assert!(matches!(err, StoreError::Reply(ref msg) if msg.contains("got 4")));
    }

    #[test]
    fn test_decode_rejects_negative_count() {
        let err = decode_reply(&[-7, 1, 1_000], &params()).unwrap_err();
        assert!(matches!(err, StoreError::Reply(ref msg) if msg.contains("negative count")));
    }

    #[test]
    fn test_store_is_cloneable() {
        // The store is shared across limiter instances; Clone must be cheap
        // and share the script SHA cache.
        fn assert_clone<T: Clone + Send + Sync>() {}
        assert_clone::<RedisCounterStore>();
    }
}
