//! Embedded collection store used when no Qdrant server is configured.
//!
//! Points live in memory and are scanned exhaustively on search. With a path,
//! the whole state is snapshotted to `collections.json` after every mutation
//! and reloaded on open. Stores opened on the same directory within one
//! process share their state, so handshakes over different collections never
//! overwrite each other's snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use handshake_core::{DistanceMetric, HandshakeError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::convert::JsonMap;

const SNAPSHOT_FILE: &str = "collections.json";

type SharedState = Arc<RwLock<LocalState>>;

/// Live persistent stores, keyed by canonical directory.
static OPEN_STORES: OnceLock<Mutex<HashMap<PathBuf, Weak<RwLock<LocalState>>>>> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LocalPoint {
    pub vector: Vec<f32>,
    pub payload: JsonMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalCollection {
    dimension: usize,
    metric: DistanceMetric,
    points: HashMap<String, LocalPoint>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalState {
    collections: HashMap<String, LocalCollection>,
}

/// In-process stand-in for a Qdrant server.
#[derive(Clone)]
pub(crate) struct LocalStore {
    state: SharedState,
    snapshot: Option<PathBuf>,
}

impl LocalStore {
    pub fn memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(LocalState::default())),
            snapshot: None,
        }
    }

    /// Open (or create) a store persisted under `dir`. A store already open
    /// on the same directory is joined rather than reloaded.
    pub async fn open(dir: &Path) -> Result<Self, HandshakeError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            HandshakeError::Configuration(format!(
                "failed to create local store at {}: {e}",
                dir.display()
            ))
        })?;
        let dir = tokio::fs::canonicalize(dir).await.map_err(|e| {
            HandshakeError::Configuration(format!(
                "failed to resolve local store path {}: {e}",
                dir.display()
            ))
        })?;
        let snapshot = dir.join(SNAPSHOT_FILE);

        // Held across the load so two concurrent opens cannot both read the file.
        let mut open = OPEN_STORES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .await;
        open.retain(|_, state| state.strong_count() > 0);

        if let Some(state) = open.get(&dir).and_then(Weak::upgrade) {
            tracing::debug!(path = %dir.display(), "joining open local store");
            return Ok(Self {
                state,
                snapshot: Some(snapshot),
            });
        }

        let state: SharedState = Arc::new(RwLock::new(load_snapshot(&snapshot).await?));
        open.insert(dir, Arc::downgrade(&state));

        Ok(Self {
            state,
            snapshot: Some(snapshot),
        })
    }

    /// Width and metric of an existing collection.
    pub async fn collection_info(&self, name: &str) -> Option<(usize, DistanceMetric)> {
        self.state
            .read()
            .await
            .collections
            .get(name)
            .map(|c| (c.dimension, c.metric))
    }

    pub async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), HandshakeError> {
        let mut state = self.state.write().await;
        if state.collections.contains_key(name) {
            return Ok(());
        }
        state.collections.insert(
            name.to_string(),
            LocalCollection {
                dimension,
                metric,
                points: HashMap::new(),
            },
        );

        if let Err(e) = self.persist(&state).await {
            state.collections.remove(name);
            return Err(e);
        }
        Ok(())
    }

    /// Insert or replace points keyed by point id. Either every point is
    /// stored and persisted or none is.
    pub async fn upsert(
        &self,
        name: &str,
        points: Vec<(String, LocalPoint)>,
    ) -> Result<(), HandshakeError> {
        let mut state = self.state.write().await;
        let collection = state
            .collections
            .get_mut(name)
            .ok_or_else(|| HandshakeError::Write(format!("collection '{name}' not found")))?;

        if let Some((_, point)) = points
            .iter()
            .find(|(_, point)| point.vector.len() != collection.dimension)
        {
            return Err(HandshakeError::Write(format!(
                "wrong vector dimension: expected {}, got {}",
                collection.dimension,
                point.vector.len()
            )));
        }

        let replaced: Vec<(String, Option<LocalPoint>)> = points
            .into_iter()
            .map(|(id, point)| {
                let previous = collection.points.insert(id.clone(), point);
                (id, previous)
            })
            .collect();

        let Err(e) = self.persist(&state).await else {
            return Ok(());
        };

        // Undo in reverse so repeated ids end at their original value.
        if let Some(collection) = state.collections.get_mut(name) {
            for (id, previous) in replaced.into_iter().rev() {
                match previous {
                    Some(point) => collection.points.insert(id, point),
                    None => collection.points.remove(&id),
                };
            }
        }
        Err(e)
    }

    /// Exhaustive nearest-neighbour scan, nearest first.
    pub async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, JsonMap, f32)>, HandshakeError> {
        let state = self.state.read().await;
        let collection = state
            .collections
            .get(name)
            .ok_or_else(|| HandshakeError::Query(format!("collection '{name}' not found")))?;

        if vector.len() != collection.dimension {
            return Err(HandshakeError::Query(format!(
                "query vector has {} dimensions, collection expects {}",
                vector.len(),
                collection.dimension
            )));
        }

        let mut scored: Vec<(String, JsonMap, f32)> = collection
            .points
            .iter()
            .map(|(id, point)| {
                let distance = collection.metric.distance(vector, &point.vector);
                (id.clone(), point.payload.clone(), distance)
            })
            .collect();

        scored.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    pub async fn count(&self, name: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(name)
            .map_or(0, |c| c.points.len())
    }

    /// Rewrite the snapshot, if this store is persistent.
    pub async fn flush(&self) -> Result<(), HandshakeError> {
        let state = self.state.read().await;
        self.persist(&state).await
    }

    async fn persist(&self, state: &LocalState) -> Result<(), HandshakeError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(state)
            .map_err(|e| HandshakeError::Write(format!("failed to serialize local store: {e}")))?;

        // Write then rename so a crash never leaves a truncated snapshot.
        let tmp = snapshot.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| HandshakeError::Write(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, snapshot).await.map_err(|e| {
            HandshakeError::Write(format!("failed to write {}: {e}", snapshot.display()))
        })?;
        Ok(())
    }
}

async fn load_snapshot(snapshot: &Path) -> Result<LocalState, HandshakeError> {
    match tokio::fs::read(snapshot).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            HandshakeError::Configuration(format!(
                "corrupt local store snapshot {}: {e}",
                snapshot.display()
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::default()),
        Err(e) => Err(HandshakeError::Configuration(format!(
            "failed to read {}: {e}",
            snapshot.display()
        ))),
    }
}
