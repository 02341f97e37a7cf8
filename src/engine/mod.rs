//! Storage engine interface and the in-memory reference engine.
//!
//! The server consumes the engine through batch calls that mirror the
//! strided C-style contract: every call takes `(base, stride)` input views,
//! an arena for its outputs, and an options set. The reference engine keeps
//! collections as ordered maps behind one `RwLock`; transactions stage their
//! writes in the handle and commit atomically; snapshots freeze a copy of
//! the store under a decimal id. A persistent engine can replace this module
//! without touching the dispatcher.

pub mod arena;
pub mod strided;
mod txn;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

pub use arena::Arena;
pub use strided::{bit_is_set, bitmap_bytes, set_bit, BytesSpan, Strided};
pub use txn::Transaction;

pub type Key = i64;
pub type CollectionId = u64;
pub type SnapshotId = u64;

/// The unnamed default collection. Always present, never removable.
pub const MAIN_COLLECTION: CollectionId = 0;

/// Length sentinel reported for keys that are absent.
pub const LENGTH_MISSING: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown collection: {0:#x}")]
    UnknownCollection(CollectionId),
    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(SnapshotId),
    #[error("bad engine configuration: {0}")]
    Config(String),
}

/// Per-call options parsed from URI flags. Advisory for the in-memory
/// engine, plumbed through so a persistent engine can honor them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub flush: bool,
    pub dont_watch: bool,
    pub shared_mem: bool,
}

/// What a drop operation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropMode {
    /// Clear stored values, retain the keys.
    Values,
    /// Remove keys and values, keep the collection.
    Contents,
    /// Remove keys, values and the collection itself.
    Collection,
}

impl DropMode {
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("values") => DropMode::Values,
            Some("contents") => DropMode::Contents,
            _ => DropMode::Collection,
        }
    }
}

/// Which part of a read result the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPart {
    Contents,
    Lengths,
    Presences,
}

impl ReadPart {
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("lengths") => ReadPart::Lengths,
            Some("presences") => ReadPart::Presences,
            _ => ReadPart::Contents,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Collection {
    name: String,
    pairs: BTreeMap<Key, Vec<u8>>,
    paths: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Default)]
struct Store {
    collections: HashMap<CollectionId, Collection>,
    names: HashMap<String, CollectionId>,
    next_collection_id: CollectionId,
    snapshots: HashMap<SnapshotId, HashMap<CollectionId, Collection>>,
    next_snapshot_id: SnapshotId,
}

impl Store {
    fn view(
        &self,
        snapshot: Option<SnapshotId>,
    ) -> Result<&HashMap<CollectionId, Collection>, EngineError> {
        match snapshot {
            None => Ok(&self.collections),
            Some(id) => self
                .snapshots
                .get(&id)
                .ok_or(EngineError::UnknownSnapshot(id)),
        }
    }
}

fn collection_in(
    view: &HashMap<CollectionId, Collection>,
    id: CollectionId,
) -> Result<&Collection, EngineError> {
    view.get(&id).ok_or(EngineError::UnknownCollection(id))
}

pub struct Engine {
    store: RwLock<Store>,
}

impl Engine {
    /// Open the engine with an opaque JSON configuration. An empty or
    /// minimal document is accepted; a `directory` entry is created if it
    /// does not exist yet.
    pub fn open(config_json: &str) -> Result<Self, EngineError> {
        let config: serde_json::Value = serde_json::from_str(config_json)
            .map_err(|err| EngineError::Config(err.to_string()))?;

        let directory = config
            .get("directory")
            .and_then(|value| value.as_str())
            .unwrap_or("");
        if !directory.is_empty() {
            std::fs::create_dir_all(directory)
                .map_err(|err| EngineError::Config(format!("{directory}: {err}")))?;
        }

        let mut store = Store {
            next_collection_id: MAIN_COLLECTION + 1,
            next_snapshot_id: 1,
            ..Store::default()
        };
        store.collections.insert(MAIN_COLLECTION, Collection::default());

        info!(directory, "engine opened");
        Ok(Self {
            store: RwLock::new(store),
        })
    }

    fn store_read(&self) -> std::sync::RwLockReadGuard<'_, Store> {
        self.store
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_write(&self) -> std::sync::RwLockWriteGuard<'_, Store> {
        self.store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open or create a collection by name; returns its id.
    pub fn collection_create(
        &self,
        name: &str,
        config: Option<&str>,
    ) -> Result<CollectionId, EngineError> {
        if name.is_empty() {
            return Ok(MAIN_COLLECTION);
        }
        let mut store = self.store_write();
        if let Some(&id) = store.names.get(name) {
            return Ok(id);
        }
        let id = store.next_collection_id;
        store.next_collection_id += 1;
        store.names.insert(name.to_string(), id);
        store.collections.insert(
            id,
            Collection {
                name: name.to_string(),
                ..Collection::default()
            },
        );
        debug!(name, id, config = config.unwrap_or(""), "collection created");
        Ok(id)
    }

    pub fn collection_drop(&self, id: CollectionId, mode: DropMode) -> Result<(), EngineError> {
        let mut store = self.store_write();
        // The main collection keeps its slot; dropping it only clears it.
        let mode = if id == MAIN_COLLECTION && mode == DropMode::Collection {
            DropMode::Contents
        } else {
            mode
        };
        match mode {
            DropMode::Values => {
                let collection = store
                    .collections
                    .get_mut(&id)
                    .ok_or(EngineError::UnknownCollection(id))?;
                for value in collection.pairs.values_mut() {
                    value.clear();
                }
                for value in collection.paths.values_mut() {
                    value.clear();
                }
            }
            DropMode::Contents => {
                let collection = store
                    .collections
                    .get_mut(&id)
                    .ok_or(EngineError::UnknownCollection(id))?;
                collection.pairs.clear();
                collection.paths.clear();
            }
            DropMode::Collection => {
                let collection = store
                    .collections
                    .remove(&id)
                    .ok_or(EngineError::UnknownCollection(id))?;
                store.names.remove(&collection.name);
            }
        }
        Ok(())
    }

    /// List named collections into the arena: ids into `ids`, names
    /// concatenated into `values` framed by `offsets`. Returns the count.
    pub fn collection_list(&self, arena: &mut Arena) -> Result<usize, EngineError> {
        arena.reset();
        arena.offsets.push(0);
        let store = self.store_read();
        let mut named: Vec<(&str, CollectionId)> = store
            .names
            .iter()
            .map(|(name, &id)| (name.as_str(), id))
            .collect();
        named.sort();
        for (name, id) in &named {
            arena.ids.push(*id);
            arena.values.extend_from_slice(name.as_bytes());
            arena.offsets.push(arena.values.len() as u32);
        }
        Ok(named.len())
    }

    pub fn snapshot_create(&self) -> Result<SnapshotId, EngineError> {
        let mut store = self.store_write();
        let id = store.next_snapshot_id;
        store.next_snapshot_id += 1;
        let frozen = store.collections.clone();
        store.snapshots.insert(id, frozen);
        debug!(id, "snapshot created");
        Ok(id)
    }

    pub fn snapshot_drop(&self, id: SnapshotId) -> Result<(), EngineError> {
        let mut store = self.store_write();
        store
            .snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownSnapshot(id))
    }

    /// List snapshot ids into `arena.ids`. Returns the count.
    pub fn snapshot_list(&self, arena: &mut Arena) -> Result<usize, EngineError> {
        arena.reset();
        let store = self.store_read();
        arena.ids.extend(store.snapshots.keys().copied());
        arena.ids.sort_unstable();
        Ok(arena.ids.len())
    }

    /// Prepare a pooled transaction handle for a fresh transaction.
    pub fn transaction_init(
        &self,
        txn: &mut Transaction,
        _options: Options,
    ) -> Result<(), EngineError> {
        txn.reset();
        Ok(())
    }

    /// Apply all staged writes atomically and clear the handle.
    pub fn transaction_commit(
        &self,
        txn: &mut Transaction,
        _options: Options,
    ) -> Result<(), EngineError> {
        let mut store = self.store_write();
        for (collection_id, _) in txn.staged.keys() {
            if !store.collections.contains_key(collection_id) {
                return Err(EngineError::UnknownCollection(*collection_id));
            }
        }
        for (collection_id, _) in txn.staged_paths.keys() {
            if !store.collections.contains_key(collection_id) {
                return Err(EngineError::UnknownCollection(*collection_id));
            }
        }
        for ((collection_id, key), value) in txn.staged.drain() {
            let collection = store
                .collections
                .get_mut(&collection_id)
                .expect("collection validated before apply");
            match value {
                Some(value) => {
                    collection.pairs.insert(key, value);
                }
                None => {
                    collection.pairs.remove(&key);
                }
            }
        }
        for ((collection_id, path), value) in txn.staged_paths.drain() {
            let collection = store
                .collections
                .get_mut(&collection_id)
                .expect("collection validated before apply");
            match value {
                Some(value) => {
                    collection.paths.insert(path, value);
                }
                None => {
                    collection.paths.remove(&path);
                }
            }
        }
        txn.reset();
        Ok(())
    }

    /// Batched point lookups. Outputs go to the arena: always the presence
    /// bitmap; offsets and values for `Contents`; lengths for `Lengths`.
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &self,
        txn: Option<&Transaction>,
        snapshot: Option<SnapshotId>,
        collections: Strided<'_, CollectionId>,
        keys: Strided<'_, Key>,
        tasks: usize,
        part: ReadPart,
        _options: Options,
        arena: &mut Arena,
    ) -> Result<(), EngineError> {
        arena.reset();
        arena.presences.resize(bitmap_bytes(tasks), 0);
        if part == ReadPart::Contents {
            arena.offsets.push(0);
        }

        let store = self.store_read();
        let view = store.view(snapshot)?;
        for task in 0..tasks {
            let collection_id = collections.get(task);
            let key = keys.get(task);
            let collection = collection_in(view, collection_id)?;
            let staged = if snapshot.is_none() {
                txn.and_then(|txn| txn.staged.get(&(collection_id, key)))
            } else {
                None
            };
            let value: Option<&[u8]> = match staged {
                Some(staged) => staged.as_deref(),
                None => collection.pairs.get(&key).map(|value| value.as_slice()),
            };

            if value.is_some() {
                set_bit(&mut arena.presences, task);
            }
            match part {
                ReadPart::Contents => {
                    arena.values.extend_from_slice(value.unwrap_or(&[]));
                    arena.offsets.push(arena.values.len() as u32);
                }
                ReadPart::Lengths => {
                    arena
                        .lengths
                        .push(value.map(|v| v.len() as u32).unwrap_or(LENGTH_MISSING));
                }
                ReadPart::Presences => {}
            }
        }
        Ok(())
    }

    /// Batched lookups keyed by variable-length paths.
    #[allow(clippy::too_many_arguments)]
    pub fn paths_read(
        &self,
        txn: Option<&Transaction>,
        collections: Strided<'_, CollectionId>,
        paths: BytesSpan<'_>,
        _separator: u8,
        tasks: usize,
        part: ReadPart,
        _options: Options,
        arena: &mut Arena,
    ) -> Result<(), EngineError> {
        arena.reset();
        arena.presences.resize(bitmap_bytes(tasks), 0);
        if part == ReadPart::Contents {
            arena.offsets.push(0);
        }

        let store = self.store_read();
        for task in 0..tasks {
            let collection_id = collections.get(task);
            let collection = collection_in(&store.collections, collection_id)?;
            let value: Option<&[u8]> = match paths.get(task) {
                None => None,
                Some(path) => {
                    let staged = txn.and_then(|txn| {
                        txn.staged_paths.get(&(collection_id, path.to_vec()))
                    });
                    match staged {
                        Some(staged) => staged.as_deref(),
                        None => collection.paths.get(path).map(|value| value.as_slice()),
                    }
                }
            };

            if value.is_some() {
                set_bit(&mut arena.presences, task);
            }
            match part {
                ReadPart::Contents => {
                    arena.values.extend_from_slice(value.unwrap_or(&[]));
                    arena.offsets.push(arena.values.len() as u32);
                }
                ReadPart::Lengths => {
                    arena
                        .lengths
                        .push(value.map(|v| v.len() as u32).unwrap_or(LENGTH_MISSING));
                }
                ReadPart::Presences => {}
            }
        }
        Ok(())
    }

    /// Prefix-match patterns against stored paths. Per task, up to the given
    /// limit of paths are returned in lexicographic order, resuming strictly
    /// after `previous` when it is provided. Outputs per-task counts into
    /// `counts` and the matched paths into `values` framed by `offsets`.
    /// Returns the total match count.
    #[allow(clippy::too_many_arguments)]
    pub fn paths_match(
        &self,
        txn: Option<&Transaction>,
        collections: Strided<'_, CollectionId>,
        patterns: BytesSpan<'_>,
        previous: BytesSpan<'_>,
        limits: Strided<'_, u32>,
        tasks: usize,
        _options: Options,
        arena: &mut Arena,
    ) -> Result<usize, EngineError> {
        arena.reset();
        arena.offsets.push(0);

        let mut total = 0usize;
        let store = self.store_read();
        for task in 0..tasks {
            let collection_id = collections.get(task);
            let collection = collection_in(&store.collections, collection_id)?;
            let pattern = patterns.get(task).unwrap_or(&[]);
            let resume_after = previous.get(task).filter(|p| !p.is_empty());
            let limit = limits.get(task) as usize;

            let mut removed: HashSet<&[u8]> = HashSet::new();
            let mut added: Vec<&[u8]> = Vec::new();
            if let Some(txn) = txn {
                for ((staged_collection, path), value) in &txn.staged_paths {
                    if *staged_collection != collection_id || !path.starts_with(pattern) {
                        continue;
                    }
                    match value {
                        Some(_) if !collection.paths.contains_key(path) => {
                            added.push(path.as_slice());
                        }
                        Some(_) => {}
                        None => {
                            removed.insert(path.as_slice());
                        }
                    }
                }
            }

            let mut matches: Vec<&[u8]> = collection
                .paths
                .range::<[u8], _>((Bound::Included(pattern), Bound::Unbounded))
                .take_while(|(path, _)| path.starts_with(pattern))
                .map(|(path, _)| path.as_slice())
                .filter(|path| !removed.contains(path))
                .filter(|path| resume_after.map_or(true, |prev| *path > prev))
                .take(limit)
                .collect();
            matches.extend(
                added
                    .iter()
                    .copied()
                    .filter(|path| resume_after.map_or(true, |prev| *path > prev)),
            );
            matches.sort_unstable();
            matches.truncate(limit);

            arena.counts.push(matches.len() as u32);
            total += matches.len();
            for path in matches {
                arena.values.extend_from_slice(path);
                arena.offsets.push(arena.values.len() as u32);
            }
        }
        Ok(total)
    }

    /// Range scans in ascending key order. Outputs the concatenated keys,
    /// per-task counts and the prefix-sum offsets (one more entry than there
    /// are tasks). Returns the total key count.
    #[allow(clippy::too_many_arguments)]
    pub fn scan(
        &self,
        txn: Option<&Transaction>,
        collections: Strided<'_, CollectionId>,
        start_keys: Strided<'_, Key>,
        limits: Strided<'_, u32>,
        tasks: usize,
        _options: Options,
        arena: &mut Arena,
    ) -> Result<usize, EngineError> {
        arena.reset();
        arena.key_offsets.push(0);

        let store = self.store_read();
        for task in 0..tasks {
            let collection_id = collections.get(task);
            let collection = collection_in(&store.collections, collection_id)?;
            let start = start_keys.get(task);
            let limit = limits.get(task) as usize;

            let mut removed: HashSet<Key> = HashSet::new();
            let mut added: Vec<Key> = Vec::new();
            if let Some(txn) = txn {
                for ((staged_collection, key), value) in &txn.staged {
                    if *staged_collection != collection_id || *key < start {
                        continue;
                    }
                    match value {
                        Some(_) if !collection.pairs.contains_key(key) => added.push(*key),
                        Some(_) => {}
                        None => {
                            removed.insert(*key);
                        }
                    }
                }
            }

            let mut result: Vec<Key> = collection
                .pairs
                .range(start..)
                .map(|(key, _)| *key)
                .filter(|key| !removed.contains(key))
                .take(limit)
                .collect();
            result.extend(added);
            result.sort_unstable();
            result.truncate(limit);

            arena.counts.push(result.len() as u32);
            arena.keys.extend_from_slice(&result);
            arena.key_offsets.push(arena.keys.len() as i64);
        }
        Ok(arena.keys.len())
    }

    /// Pick an evenly-strided subset of each collection's keys, up to the
    /// per-task limit. The caller's transaction overlays the committed
    /// state, as for `scan`. Output shape matches `scan`. Returns the total
    /// key count.
    pub fn sample(
        &self,
        txn: Option<&Transaction>,
        collections: Strided<'_, CollectionId>,
        limits: Strided<'_, u32>,
        tasks: usize,
        _options: Options,
        arena: &mut Arena,
    ) -> Result<usize, EngineError> {
        arena.reset();
        arena.key_offsets.push(0);

        let store = self.store_read();
        for task in 0..tasks {
            let collection_id = collections.get(task);
            let collection = collection_in(&store.collections, collection_id)?;
            let limit = limits.get(task) as usize;

            let mut removed: HashSet<Key> = HashSet::new();
            let mut added: Vec<Key> = Vec::new();
            if let Some(txn) = txn {
                for ((staged_collection, key), value) in &txn.staged {
                    if *staged_collection != collection_id {
                        continue;
                    }
                    match value {
                        Some(_) if !collection.pairs.contains_key(key) => added.push(*key),
                        Some(_) => {}
                        None => {
                            removed.insert(*key);
                        }
                    }
                }
            }

            // Striding needs the population size up front, so the merged
            // view is materialized before sampling it.
            let mut population: Vec<Key> = collection
                .pairs
                .keys()
                .copied()
                .filter(|key| !removed.contains(key))
                .collect();
            population.extend(added);
            population.sort_unstable();

            let available = population.len();
            let take = limit.min(available);
            let step = if take == 0 { 1 } else { (available / take).max(1) };

            let before = arena.keys.len();
            arena
                .keys
                .extend(population.into_iter().step_by(step).take(take));
            arena.counts.push((arena.keys.len() - before) as u32);
            arena.key_offsets.push(arena.keys.len() as i64);
        }
        Ok(arena.keys.len())
    }

    /// Batched upserts. A null value deletes the key. Under a transaction
    /// the writes are staged in the handle instead of applied.
    pub fn write(
        &self,
        txn: Option<&mut Transaction>,
        collections: Strided<'_, CollectionId>,
        keys: Strided<'_, Key>,
        values: BytesSpan<'_>,
        tasks: usize,
        _options: Options,
    ) -> Result<(), EngineError> {
        match txn {
            Some(txn) => {
                let store = self.store_read();
                for task in 0..tasks {
                    let collection_id = collections.get(task);
                    collection_in(&store.collections, collection_id)?;
                    txn.staged.insert(
                        (collection_id, keys.get(task)),
                        values.get(task).map(|value| value.to_vec()),
                    );
                }
            }
            None => {
                let mut store = self.store_write();
                for task in 0..tasks {
                    let collection_id = collections.get(task);
                    let collection = store
                        .collections
                        .get_mut(&collection_id)
                        .ok_or(EngineError::UnknownCollection(collection_id))?;
                    match values.get(task) {
                        Some(value) => {
                            collection.pairs.insert(keys.get(task), value.to_vec());
                        }
                        None => {
                            collection.pairs.remove(&keys.get(task));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Batched upserts keyed by variable-length paths.
    #[allow(clippy::too_many_arguments)]
    pub fn paths_write(
        &self,
        txn: Option<&mut Transaction>,
        collections: Strided<'_, CollectionId>,
        paths: BytesSpan<'_>,
        _separator: u8,
        values: BytesSpan<'_>,
        tasks: usize,
        _options: Options,
    ) -> Result<(), EngineError> {
        match txn {
            Some(txn) => {
                let store = self.store_read();
                for task in 0..tasks {
                    let collection_id = collections.get(task);
                    collection_in(&store.collections, collection_id)?;
                    let Some(path) = paths.get(task) else { continue };
                    txn.staged_paths.insert(
                        (collection_id, path.to_vec()),
                        values.get(task).map(|value| value.to_vec()),
                    );
                }
            }
            None => {
                let mut store = self.store_write();
                for task in 0..tasks {
                    let collection_id = collections.get(task);
                    let collection = store
                        .collections
                        .get_mut(&collection_id)
                        .ok_or(EngineError::UnknownCollection(collection_id))?;
                    let Some(path) = paths.get(task) else { continue };
                    match values.get(task) {
                        Some(value) => {
                            collection.paths.insert(path.to_vec(), value.to_vec());
                        }
                        None => {
                            collection.paths.remove(path);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
