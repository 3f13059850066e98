//! In-memory `member_id -> Robot` index, load-on-miss with single-flight
//! dedup, invalidated by `robot.config.*` events.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::domain::{Robot, RobotRecord};
use crate::error::EngineError;
use crate::events::{Event, EventBus, EventPayload};
use crate::store::RobotStore;

/// Holds a robot's id while its first load from the store is in flight, so
/// concurrent readers for the same id share one fetch instead of racing.
enum Entry {
    Ready(Arc<Robot>),
    Loading,
}

pub struct RobotCache {
    store: Arc<RobotStore>,
    robots: AsyncMutex<HashMap<String, Entry>>,
}

impl RobotCache {
    /// Bulk-loads every persisted robot into the cache.
    pub async fn load_all(store: Arc<RobotStore>) -> Result<Arc<Self>, EngineError> {
        let mut robots = HashMap::new();
        for record in store.list_all() {
            let member_id = record.member_id.clone();
            robots.insert(member_id, Entry::Ready(Arc::new(Robot::from(record))));
        }
        Ok(Arc::new(Self { store, robots: AsyncMutex::new(robots) }))
    }

    /// Fetch a robot by id, loading through to the store on a cache miss.
    /// Concurrent misses for the same id serialize on the cache's lock
    /// rather than issuing duplicate store reads (the lock is held for the
    /// duration of the load, which doubles as the single-flight dedup).
    pub async fn get(&self, member_id: &str) -> Result<Arc<Robot>, EngineError> {
        let mut robots = self.robots.lock().await;
        if let Some(Entry::Ready(robot)) = robots.get(member_id) {
            return Ok(robot.clone());
        }

        robots.insert(member_id.to_string(), Entry::Loading);
        let record = self.store.get(member_id)?.ok_or_else(|| EngineError::RobotNotFound(member_id.to_string()))?;
        let robot = Arc::new(Robot::from(record));
        robots.insert(member_id.to_string(), Entry::Ready(robot.clone()));
        Ok(robot)
    }

    /// Apply a `robot.config.*` event: reload on created/updated, evict on
    /// deleted. Call this from an `EventBus` subscriber loop.
    pub async fn apply(&self, payload: &EventPayload) {
        match payload {
            EventPayload::RobotConfigCreated { member_id } | EventPayload::RobotConfigUpdated { member_id } => {
                match self.store.get(member_id) {
                    Ok(Some(record)) => {
                        self.robots.lock().await.insert(member_id.clone(), Entry::Ready(Arc::new(Robot::from(record))));
                    }
                    Ok(None) => debug!(member_id, "RobotCache::apply: config event for a now-missing robot"),
                    Err(e) => debug!(member_id, error = %e, "RobotCache::apply: reload failed"),
                }
            }
            EventPayload::RobotConfigDeleted { member_id } => {
                self.robots.lock().await.remove(member_id);
            }
            _ => {}
        }
    }

    /// Subscribe to `robot.config.*` on `bus` and keep this cache in sync
    /// for as long as the returned task runs. Returns the subscriber id so
    /// the caller can `bus.unsubscribe` it on shutdown.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) -> (u64, tokio::task::JoinHandle<()>) {
        let (id, mut rx) = bus.subscribe("robot.config.*");
        let cache = self.clone();
        let task = tokio::spawn(async move {
            while let Some(Event { payload, .. }) = rx.recv().await {
                cache.apply(&payload).await;
            }
        });
        (id, task)
    }

    pub async fn insert(&self, record: RobotRecord) {
        let member_id = record.member_id.clone();
        self.robots.lock().await.insert(member_id, Entry::Ready(Arc::new(Robot::from(record))));
    }

    pub async fn len(&self) -> usize {
        self.robots.lock().await.len()
    }
}
