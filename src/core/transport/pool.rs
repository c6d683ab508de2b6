//! Pre-connected channel pool.
//!
//! Channels are keyed by [`ConnectTarget::pool_key`]. A pooled channel has
//! completed its WebSocket upgrade but has never carried a task, so it can
//! take the place of a fresh connect. Entries older than the idle timeout
//! are dropped on access.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{ChannelConnector, ConnectTarget, TransportChannel};
use crate::config::PoolConfig;

struct IdleChannel {
    channel: Box<dyn TransportChannel>,
    since: Instant,
}

pub struct PreconnectedPool {
    config: RwLock<PoolConfig>,
    idle: Mutex<HashMap<String, Vec<IdleChannel>>>,
    /// Pre-connects currently running, per key.
    pending: Mutex<HashMap<String, usize>>,
}

impl PreconnectedPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config: RwLock::new(config),
            idle: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure(&self, config: PoolConfig) {
        *self.config.write() = config;
        if !config.enabled() {
            self.idle.lock().clear();
        }
    }

    pub fn config(&self) -> PoolConfig {
        *self.config.read()
    }

    /// Take a fresh idle channel for `key`, discarding expired ones.
    pub fn take(&self, key: &str) -> Option<Box<dyn TransportChannel>> {
        let config = self.config();
        if !config.enabled() {
            return None;
        }
        let max_idle = Duration::from_millis(config.idle_timeout_ms);
        let mut idle = self.idle.lock();
        let entries = idle.get_mut(key)?;
        while let Some(entry) = entries.pop() {
            if entry.since.elapsed() <= max_idle && entry.channel.is_open() {
                return Some(entry.channel);
            }
            debug!("Discarding expired pooled channel");
        }
        None
    }

    /// Offer a channel to the pool. Returns it back when the pool is full
    /// or disabled so the caller can close it.
    pub fn put(
        &self,
        key: String,
        channel: Box<dyn TransportChannel>,
    ) -> Option<Box<dyn TransportChannel>> {
        let config = self.config();
        if !config.enabled() || !channel.is_open() {
            return Some(channel);
        }
        let max_idle = Duration::from_millis(config.idle_timeout_ms);
        let mut idle = self.idle.lock();
        let entries = idle.entry(key).or_default();
        entries.retain(|e| e.since.elapsed() <= max_idle);
        if entries.len() >= config.max_count {
            return Some(channel);
        }
        entries.push(IdleChannel {
            channel,
            since: Instant::now(),
        });
        None
    }

    pub fn idle_count(&self, key: &str) -> usize {
        self.idle.lock().get(key).map_or(0, Vec::len)
    }

    /// Top the pool up for `target` in the background.
    pub fn replenish(
        self: &Arc<Self>,
        handle: &Handle,
        connector: Arc<dyn ChannelConnector>,
        target: ConnectTarget,
    ) {
        let config = self.config();
        if !config.enabled() {
            return;
        }
        let key = target.pool_key();
        {
            let mut pending = self.pending.lock();
            let in_flight = pending.entry(key.clone()).or_default();
            if self.idle_count(&key) + *in_flight >= config.max_count {
                return;
            }
            *in_flight += 1;
        }

        let pool = Arc::clone(self);
        let budget = Duration::from_millis(config.request_timeout_ms);
        handle.spawn(async move {
            match connector.connect(&target, budget).await {
                Ok(channel) => {
                    if let Some(mut rejected) = pool.put(key.clone(), channel) {
                        rejected.close().await;
                    } else {
                        debug!("Pre-connected channel added to pool");
                    }
                }
                Err(e) => warn!("Pre-connect to {} failed: {}", target.url, e),
            }
            if let Some(n) = pool.pending.lock().get_mut(&key) {
                *n = n.saturating_sub(1);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ChannelMessage, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct IdleStub {
        open: bool,
    }

    #[async_trait]
    impl TransportChannel for IdleStub {
        async fn send_text(&mut self, text: String) -> Result<usize, TransportError> {
            Ok(text.len())
        }
        async fn send_binary(&mut self, data: Bytes) -> Result<usize, TransportError> {
            Ok(data.len())
        }
        async fn recv(&mut self) -> Result<ChannelMessage, TransportError> {
            Err(TransportError::Closed)
        }
        async fn close(&mut self) {
            self.open = false;
        }
        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn stub() -> Box<dyn TransportChannel> {
        Box::new(IdleStub { open: true })
    }

    #[test]
    fn test_disabled_pool_rejects() {
        let pool = PreconnectedPool::new(PoolConfig::default());
        assert!(pool.put("k".into(), stub()).is_some());
        assert!(pool.take("k").is_none());
    }

    #[test]
    fn test_put_take_respects_capacity() {
        let pool = PreconnectedPool::new(PoolConfig::new(1, 10_000, 1_000));
        assert!(pool.put("k".into(), stub()).is_none());
        assert!(pool.put("k".into(), stub()).is_some());
        assert_eq!(pool.idle_count("k"), 1);
        assert!(pool.take("k").is_some());
        assert!(pool.take("k").is_none());
    }

    #[test]
    fn test_expired_channels_are_dropped() {
        let pool = PreconnectedPool::new(PoolConfig::new(2, 0, 1_000));
        assert!(pool.put("k".into(), stub()).is_none());
        std::thread::sleep(Duration::from_millis(5));
        assert!(pool.take("k").is_none());
    }

    #[test]
    fn test_closed_channel_not_pooled() {
        let pool = PreconnectedPool::new(PoolConfig::new(2, 10_000, 1_000));
        assert!(
            pool.put("k".into(), Box::new(IdleStub { open: false }))
                .is_some()
        );
    }
}
