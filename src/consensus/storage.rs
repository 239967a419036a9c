use crate::consensus::state_machine::{Event, SharedValue, ValueSnapshot};
use anyhow::Result;
use openraft::storage::{Adaptor, LogState, RaftStorage};
use openraft::{
    Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader,
    RaftSnapshotBuilder, Snapshot, SnapshotMeta, StorageError, StoredMembership, Vote,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::Mutex;

pub type NodeIdType = u64;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = Event,
        R = (),
        Node = Member,
);

/// A cluster participant as recorded in the membership log. Identity is
/// derived from the address, so the address is the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Member {
    pub addr: String,
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

const KEY_VOTE: &[u8] = b"vote";
const KEY_LAST_PURGED: &[u8] = b"last_purged";
const KEY_LAST_APPLIED: &[u8] = b"last_applied";
const KEY_MEMBERSHIP: &[u8] = b"membership";
const KEY_SNAPSHOT_IDX: &[u8] = b"snapshot_idx";
const KEY_SNAPSHOT_META: &[u8] = b"snapshot_meta";
const KEY_SNAPSHOT_DATA: &[u8] = b"snapshot_data";
const KEY_VALUE_SNAPSHOT: &[u8] = b"value_snapshot";

fn read_err(
    subject: ErrorSubject<NodeIdType>,
    err: impl std::error::Error + Send + Sync + 'static,
) -> StorageError<NodeIdType> {
    StorageError::from_io_error(
        subject,
        ErrorVerb::Read,
        std::io::Error::new(std::io::ErrorKind::Other, err),
    )
}

fn write_err(
    subject: ErrorSubject<NodeIdType>,
    err: impl std::error::Error + Send + Sync + 'static,
) -> StorageError<NodeIdType> {
    StorageError::from_io_error(
        subject,
        ErrorVerb::Write,
        std::io::Error::new(std::io::ErrorKind::Other, err),
    )
}

/// A committed entry that cannot be decoded is a deterministic-replication
/// bug, not an I/O hiccup: every replica agreed on these bytes, so a node
/// that cannot interpret them must stop rather than diverge. The raft core
/// treats this storage error as fatal and halts.
fn corrupt_entry_err(err: serde_json::Error) -> StorageError<NodeIdType> {
    StorageError::from_io_error(
        ErrorSubject::Logs,
        ErrorVerb::Read,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("cannot decode committed log entry: {err}"),
        ),
    )
}

/// sled-backed durable log store, stable store and snapshot store, rooted
/// under the node's data directory. Also drives the in-memory state machine
/// on the apply path: the raft core hands committed entries to this type,
/// which forwards them to [`SharedValue`].
pub struct SledStore {
    db: sled::Db,
    log_tree: sled::Tree,
    meta_tree: sled::Tree,
    state: SharedValue,
    snapshot_idx: Mutex<u64>,
}

impl SledStore {
    /// Opens (or creates) the store and, if a value snapshot was persisted
    /// by a previous run, restores the state machine from it so the log
    /// does not have to be replayed from the beginning.
    pub fn new<P: AsRef<Path>>(path: P, state: SharedValue) -> Result<Self> {
        let db = sled::open(path)?;
        let log_tree = db.open_tree("log")?;
        let meta_tree = db.open_tree("meta")?;

        let snapshot_idx = meta_tree
            .get(KEY_SNAPSHOT_IDX)?
            .map(|v| bincode::deserialize(&v))
            .transpose()?
            .unwrap_or(0);

        if let Some(raw) = meta_tree.get(KEY_VALUE_SNAPSHOT)? {
            // A stable store we cannot decode is not locally recoverable.
            let snapshot: ValueSnapshot = serde_json::from_slice(&raw)?;
            state.restore(snapshot);
            tracing::info!(value = snapshot.value, "restored value from persisted snapshot");
        }

        Ok(Self {
            db,
            log_tree,
            meta_tree,
            state,
            snapshot_idx: Mutex::new(snapshot_idx),
        })
    }

    fn log_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn clone_handle(&self) -> Self {
        Self {
            db: self.db.clone(),
            log_tree: self.log_tree.clone(),
            meta_tree: self.meta_tree.clone(),
            state: self.state.clone(),
            snapshot_idx: Mutex::new(*self.snapshot_idx.lock().unwrap()),
        }
    }

    // A stable-store record that exists but does not decode must surface as
    // an error: a corrupt vote read as "never voted" could grant a second
    // vote in the same term.
    fn get_meta<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
    ) -> Result<Option<T>, StorageError<NodeIdType>> {
        self.meta_tree
            .get(key)
            .map_err(|e| read_err(ErrorSubject::Store, e))?
            .map(|v| bincode::deserialize(&v).map_err(|e| read_err(ErrorSubject::Store, e)))
            .transpose()
    }

    fn set_meta<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StorageError<NodeIdType>> {
        let data =
            bincode::serialize(value).map_err(|e| write_err(ErrorSubject::Store, e))?;
        self.meta_tree
            .insert(key, data)
            .map_err(|e| write_err(ErrorSubject::Store, e))?;
        Ok(())
    }

    fn get_membership(
        &self,
    ) -> Result<StoredMembership<NodeIdType, Member>, StorageError<NodeIdType>> {
        Ok(self
            .meta_tree
            .get(KEY_MEMBERSHIP)
            .map_err(|e| read_err(ErrorSubject::Store, e))?
            .map(|v| serde_json::from_slice(&v).map_err(|e| read_err(ErrorSubject::Store, e)))
            .transpose()?
            .unwrap_or_default())
    }

    fn set_membership(
        &self,
        membership: &StoredMembership<NodeIdType, Member>,
    ) -> Result<(), StorageError<NodeIdType>> {
        let data = serde_json::to_vec(membership)
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;
        self.meta_tree
            .insert(KEY_MEMBERSHIP, data)
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;
        Ok(())
    }

    /// Persists the current state-machine value so a restart restores
    /// instead of replaying. Transactional from the engine's point of view:
    /// a failure at any step propagates and the previous snapshot record
    /// stays the valid one.
    fn save_value_snapshot(&self) -> Result<(), StorageError<NodeIdType>> {
        let snapshot = self.state.snapshot();
        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;
        self.meta_tree
            .insert(KEY_VALUE_SNAPSHOT, data)
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;
        self.meta_tree
            .flush()
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;
        Ok(())
    }

    /// Records a built or installed snapshot so later replication sessions
    /// can fetch it when a lagging follower's next entry has been purged
    /// from the log. A failure at any step propagates and the previous
    /// snapshot stays the current one.
    fn save_current_snapshot(
        &self,
        meta: &SnapshotMeta<NodeIdType, Member>,
        data: &[u8],
    ) -> Result<(), StorageError<NodeIdType>> {
        let subject = || ErrorSubject::Snapshot(Some(meta.signature()));
        let meta_bytes = serde_json::to_vec(meta).map_err(|e| write_err(subject(), e))?;
        self.meta_tree
            .insert(KEY_SNAPSHOT_META, meta_bytes)
            .map_err(|e| write_err(subject(), e))?;
        self.meta_tree
            .insert(KEY_SNAPSHOT_DATA, data)
            .map_err(|e| write_err(subject(), e))?;
        self.meta_tree
            .flush()
            .map_err(|e| write_err(subject(), e))?;
        Ok(())
    }
}

impl RaftLogReader<TypeConfig> for SledStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeIdType>> {
        let start = match range.start_bound() {
            std::ops::Bound::Included(&s) => s,
            std::ops::Bound::Excluded(&s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(&e) => Some(e + 1),
            std::ops::Bound::Excluded(&e) => Some(e),
            std::ops::Bound::Unbounded => None,
        };

        let mut entries = Vec::new();
        for item in self.log_tree.range(Self::log_key(start)..) {
            let (key, value) = item.map_err(|e| read_err(ErrorSubject::Logs, e))?;

            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(key.as_ref());
            let index = u64::from_be_bytes(index_bytes);
            if let Some(e) = end {
                if index >= e {
                    break;
                }
            }

            let entry: Entry<TypeConfig> =
                serde_json::from_slice(&value).map_err(corrupt_entry_err)?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

impl RaftSnapshotBuilder<TypeConfig> for SledStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeIdType>> {
        let snapshot = self.state.snapshot();
        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| write_err(ErrorSubject::StateMachine, e))?;

        let last_applied: Option<LogId<NodeIdType>> = self.get_meta(KEY_LAST_APPLIED)?;
        let last_membership = self.get_membership()?;

        let snapshot_idx = {
            let mut idx = self.snapshot_idx.lock().unwrap();
            *idx += 1;
            *idx
        };
        self.set_meta(KEY_SNAPSHOT_IDX, &snapshot_idx)?;

        let snapshot_id = format!(
            "{}-{}-{}",
            last_applied
                .map(|l| l.leader_id.to_string())
                .unwrap_or_default(),
            last_applied.map(|l| l.index).unwrap_or(0),
            snapshot_idx
        );

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id,
        };

        self.save_current_snapshot(&meta, &data)?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for SledStore {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeIdType>> {
        let last_purged: Option<LogId<NodeIdType>> = self.get_meta(KEY_LAST_PURGED)?;

        let last_log_id = match self
            .log_tree
            .last()
            .map_err(|e| read_err(ErrorSubject::Logs, e))?
        {
            Some((_, v)) => {
                let entry: Entry<TypeConfig> =
                    serde_json::from_slice(&v).map_err(corrupt_entry_err)?;
                Some(entry.log_id)
            }
            None => last_purged,
        };

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeIdType>) -> Result<(), StorageError<NodeIdType>> {
        self.set_meta(KEY_VOTE, vote)?;
        self.meta_tree
            .flush()
            .map_err(|e| write_err(ErrorSubject::Vote, e))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeIdType>>, StorageError<NodeIdType>> {
        self.get_meta(KEY_VOTE)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone_handle()
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeIdType>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        for entry in entries {
            let key = Self::log_key(entry.log_id.index);
            let value =
                serde_json::to_vec(&entry).map_err(|e| write_err(ErrorSubject::Logs, e))?;
            self.log_tree
                .insert(key, value)
                .map_err(|e| write_err(ErrorSubject::Logs, e))?;
        }
        self.log_tree
            .flush()
            .map_err(|e| write_err(ErrorSubject::Logs, e))?;
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeIdType>,
    ) -> Result<(), StorageError<NodeIdType>> {
        let keys_to_remove: Vec<_> = self
            .log_tree
            .range(Self::log_key(log_id.index)..)
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();

        for key in keys_to_remove {
            self.log_tree
                .remove(key)
                .map_err(|e| write_err(ErrorSubject::Logs, e))?;
        }
        Ok(())
    }

    async fn purge_logs_upto(
        &mut self,
        log_id: LogId<NodeIdType>,
    ) -> Result<(), StorageError<NodeIdType>> {
        self.set_meta(KEY_LAST_PURGED, &log_id)?;

        let keys_to_remove: Vec<_> = self
            .log_tree
            .range(..=Self::log_key(log_id.index))
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();

        for key in keys_to_remove {
            self.log_tree
                .remove(key)
                .map_err(|e| write_err(ErrorSubject::Logs, e))?;
        }
        Ok(())
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<
        (
            Option<LogId<NodeIdType>>,
            StoredMembership<NodeIdType, Member>,
        ),
        StorageError<NodeIdType>,
    > {
        Ok((self.get_meta(KEY_LAST_APPLIED)?, self.get_membership()?))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<()>, StorageError<NodeIdType>> {
        let mut results = Vec::new();

        for entry in entries {
            self.set_meta(KEY_LAST_APPLIED, &entry.log_id)?;

            match &entry.payload {
                EntryPayload::Blank => {}
                EntryPayload::Normal(event) => {
                    self.state.apply(event);
                }
                EntryPayload::Membership(mem) => {
                    let membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    self.set_membership(&membership)?;
                }
            }
            results.push(());
        }

        self.save_value_snapshot()?;

        Ok(results)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone_handle()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeIdType>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeIdType, Member>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeIdType>> {
        let data = snapshot.into_inner();
        let value_snapshot: ValueSnapshot = serde_json::from_slice(&data).map_err(|e| {
            StorageError::from_io_error(
                ErrorSubject::Snapshot(Some(meta.signature())),
                ErrorVerb::Read,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("cannot decode snapshot: {e}"),
                ),
            )
        })?;

        self.state.restore(value_snapshot);

        if let Some(log_id) = meta.last_log_id {
            self.set_meta(KEY_LAST_APPLIED, &log_id)?;
        }
        self.set_membership(&meta.last_membership)?;
        self.save_value_snapshot()?;
        self.save_current_snapshot(meta, &data)?;

        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeIdType>> {
        let meta: SnapshotMeta<NodeIdType, Member> = match self
            .meta_tree
            .get(KEY_SNAPSHOT_META)
            .map_err(|e| read_err(ErrorSubject::Snapshot(None), e))?
        {
            Some(raw) => serde_json::from_slice(&raw)
                .map_err(|e| read_err(ErrorSubject::Snapshot(None), e))?,
            None => return Ok(None),
        };

        let data = self
            .meta_tree
            .get(KEY_SNAPSHOT_DATA)
            .map_err(|e| read_err(ErrorSubject::Snapshot(None), e))?
            .map(|v| v.to_vec())
            .unwrap_or_default();

        Ok(Some(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        }))
    }
}

pub type LogStore = Adaptor<TypeConfig, SledStore>;
pub type StateMachineStore = Adaptor<TypeConfig, SledStore>;

pub fn create_storage<P: AsRef<Path>>(
    path: P,
    state: SharedValue,
) -> Result<(LogStore, StateMachineStore)> {
    let storage = SledStore::new(path, state)?;
    Ok(Adaptor::new(storage))
}
