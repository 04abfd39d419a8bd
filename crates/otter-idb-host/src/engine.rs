//! Database and transaction state owned by the host event loop
//!
//! Nothing in here is shared: the event loop thread owns one [`HostState`]
//! and applies jobs to it one at a time. Each transaction keeps an overlay of
//! its uncommitted writes per store; reads merge the overlay over committed
//! data.

use crate::config::AutoCommit;
use crate::persist::{PersistedDb, PersistedStore, Persistence};
use crate::schema::{ObjectStoreOptions, SchemaChange};
use otter_idb::request::Completer;
use otter_idb::{
    CursorEntry, DomErrorName, IdbError, IdbResult, Key, KeyRange, Query, TransactionScope, Value,
    count_limit,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct StoreData {
    pub options: ObjectStoreOptions,
    pub records: BTreeMap<Key, Value>,
    /// Next generated key (key generator current number)
    pub next_key: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DbData {
    pub version: u64,
    pub stores: BTreeMap<String, StoreData>,
}

/// Uncommitted writes of one transaction to one store
#[derive(Debug, Default)]
pub(crate) struct StoreDelta {
    pub cleared: bool,
    /// `None` marks a deletion
    pub writes: BTreeMap<Key, Option<Value>>,
    pub next_key: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Committed,
    /// With the storage failure that caused it, if any
    Aborted(Option<String>),
}

struct TxnData {
    db: String,
    scope: TransactionScope,
    status: TxnStatus,
    deltas: BTreeMap<String, StoreDelta>,
    requests: usize,
    deadline: Option<Instant>,
    waiters: Vec<Completer<()>>,
}

struct CursorData {
    txn: u64,
    store: String,
    range: Option<KeyRange>,
    last: Option<Key>,
}

/// Store request carried by a job
#[derive(Debug, Clone)]
pub(crate) enum StoreOp {
    Put { value: Value, key: Option<Key> },
    Add { value: Value, key: Option<Key> },
    Delete(Query),
    Clear,
    Get(Query),
    GetKey(Query),
    GetAll(Query, Option<u32>),
    GetAllKeys(Query, Option<u32>),
    Count(Query),
    OpenCursor(Option<KeyRange>),
    Continue(u64),
}

impl StoreOp {
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::Put { .. } => "put",
            StoreOp::Add { .. } => "add",
            StoreOp::Delete(_) => "delete",
            StoreOp::Clear => "clear",
            StoreOp::Get(_) => "get",
            StoreOp::GetKey(_) => "getKey",
            StoreOp::GetAll(..) => "getAll",
            StoreOp::GetAllKeys(..) => "getAllKeys",
            StoreOp::Count(_) => "count",
            StoreOp::OpenCursor(_) => "openCursor",
            StoreOp::Continue(_) => "continue",
        }
    }

    fn is_write(&self) -> bool {
        matches!(
            self,
            StoreOp::Put { .. } | StoreOp::Add { .. } | StoreOp::Delete(_) | StoreOp::Clear
        )
    }
}

/// Result of a [`StoreOp`]
#[derive(Debug)]
pub(crate) enum StoreReply {
    Done,
    Value(Option<Value>),
    Key(Option<Key>),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor { id: u64, entry: Option<CursorEntry> },
    Entry(Option<CursorEntry>),
}

/// What an open request found
#[derive(Debug)]
pub(crate) struct OpenOutcome {
    pub old_version: u64,
    pub stores: BTreeMap<String, ObjectStoreOptions>,
}

fn aborted_error(reason: &Option<String>) -> IdbError {
    match reason {
        Some(message) => IdbError::Storage(message.clone()),
        None => IdbError::dom(DomErrorName::Abort, "The transaction was aborted."),
    }
}

/// Committed records of `data` in `query`, with `delta` laid over them
fn merged(data: &StoreData, delta: Option<&StoreDelta>, query: &Query) -> BTreeMap<Key, Value> {
    let Some(bounds) = query.bounds() else {
        return BTreeMap::new();
    };
    let mut view: BTreeMap<Key, Value> = if delta.is_some_and(|d| d.cleared) {
        BTreeMap::new()
    } else {
        data.records
            .range::<Key, _>(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    if let Some(delta) = delta {
        for (key, write) in delta.writes.range::<Key, _>(bounds) {
            match write {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                }
                None => {
                    view.remove(key);
                }
            }
        }
    }
    view
}

/// First entry of `range` strictly after `after`
fn next_entry(
    data: &StoreData,
    delta: Option<&StoreDelta>,
    range: Option<&KeyRange>,
    after: Option<&Key>,
) -> Option<CursorEntry> {
    let query = match (range, after) {
        (range, None) => Query::from(range.cloned()),
        (Some(range), Some(last)) => Query::Range(range.after(last)?),
        (None, Some(last)) => Query::Range(KeyRange::lower_bound(last.clone(), true)),
    };
    merged(data, delta, &query)
        .into_iter()
        .next()
        .map(|(key, value)| CursorEntry { key, value })
}

/// Write `key` into `value` at the dotted `path`, creating nothing but the
/// final segment.
fn inject_key(value: &mut Value, path: &str, key: &Key) -> IdbResult<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return Err(IdbError::data("empty key path"));
    };
    let mut target = value;
    for segment in segments {
        target = match target {
            Value::Map(map) => map
                .get_mut(segment)
                .ok_or_else(|| IdbError::data("The key path could not be evaluated."))?,
            _ => return Err(IdbError::data("The key path could not be evaluated.")),
        };
    }
    match target {
        Value::Map(map) => {
            let key_value = match key {
                Key::Number(n) => Value::Number(*n),
                Key::String(s) => Value::String(s.clone()),
                Key::Binary(b) => Value::Bytes(b.clone()),
            };
            map.insert(last.to_string(), key_value);
            Ok(())
        }
        _ => Err(IdbError::data(
            "A generated key could not be inserted into the value.",
        )),
    }
}

/// Largest key a key generator hands out (2^53)
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Work out the key of a put/add. Returns the key, the value to store and
/// the key generator's new current number if it moved.
fn resolve_key(
    data: &StoreData,
    delta: Option<&StoreDelta>,
    mut value: Value,
    key: Option<Key>,
) -> IdbResult<(Key, Value, Option<u64>)> {
    let options = &data.options;
    let current = delta.and_then(|d| d.next_key).unwrap_or(data.next_key);
    let generate = |current: u64| {
        if current > MAX_GENERATED_KEY {
            return Err(IdbError::constraint(
                "The key generator has reached its maximum value.",
            ));
        }
        Ok((Key::Number(current as f64), Some(current + 1)))
    };

    let (key, next) = match (&options.key_path, key) {
        (Some(_), Some(_)) => {
            return Err(IdbError::data(
                "The object store uses in-line keys and the key parameter was provided.",
            ));
        }
        (Some(path), None) => match value.get_path(path).and_then(Value::to_key) {
            Some(key) => (key, None),
            None if options.auto_increment => {
                let (key, next) = generate(current)?;
                inject_key(&mut value, path, &key)?;
                (key, next)
            }
            None => {
                return Err(IdbError::data(
                    "Evaluating the object store's key path did not yield a value.",
                ));
            }
        },
        (None, Some(key)) => (key, None),
        (None, None) if options.auto_increment => generate(current)?,
        (None, None) => {
            return Err(IdbError::data(
                "The object store uses out-of-line keys and has no key generator and the key parameter was not provided.",
            ));
        }
    };
    key.validate()?;

    // explicit numeric keys push the generator forward
    let next = match (&key, next) {
        (_, Some(next)) => Some(next),
        (Key::Number(n), None) if options.auto_increment && *n >= current as f64 => {
            Some((n.floor().min(MAX_GENERATED_KEY as f64) as u64).saturating_add(1))
        }
        _ => None,
    };
    Ok((key, value, next))
}

pub(crate) struct HostState {
    dbs: HashMap<String, DbData>,
    txns: HashMap<u64, TxnData>,
    cursors: HashMap<u64, CursorData>,
    next_id: u64,
    auto_commit: AutoCommit,
    persist: Option<Persistence>,
}

impl HostState {
    pub fn new(auto_commit: AutoCommit, persist: Option<Persistence>) -> IdbResult<Self> {
        let dbs = match &persist {
            Some(persist) => persist.load()?,
            None => HashMap::new(),
        };
        Ok(Self {
            dbs,
            txns: HashMap::new(),
            cursors: HashMap::new(),
            next_id: 1,
            auto_commit,
            persist,
        })
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn deadline(&self, now: Instant) -> Option<Instant> {
        self.auto_commit.idle_window().map(|window| now + window)
    }

    pub fn open_db(&mut self, name: &str, version: u64) -> IdbResult<OpenOutcome> {
        if version == 0 {
            return Err(IdbError::data("The version must be at least 1."));
        }
        let db = self.dbs.entry(name.to_string()).or_default();
        if version < db.version {
            return Err(IdbError::dom(
                DomErrorName::Version,
                format!(
                    "The requested version ({version}) is less than the existing version ({}).",
                    db.version
                ),
            ));
        }
        Ok(OpenOutcome {
            old_version: db.version,
            stores: db
                .stores
                .iter()
                .map(|(name, store)| (name.clone(), store.options.clone()))
                .collect(),
        })
    }

    /// Apply the schema changes of an upgrade callback and bump the version
    pub fn upgrade(
        &mut self,
        name: &str,
        version: u64,
        changes: Vec<SchemaChange>,
    ) -> IdbResult<Vec<String>> {
        let db = self
            .dbs
            .get_mut(name)
            .ok_or_else(|| IdbError::not_found(format!("database '{name}' is not open")))?;
        if version <= db.version {
            return Err(IdbError::dom(
                DomErrorName::Version,
                format!("database '{name}' is already at version {}", db.version),
            ));
        }

        let mut staged: BTreeMap<String, ObjectStoreOptions> = db
            .stores
            .iter()
            .map(|(name, store)| (name.clone(), store.options.clone()))
            .collect();
        let mut deleted = Vec::new();
        for change in &changes {
            match change {
                SchemaChange::Create { name, options } => {
                    if staged.insert(name.clone(), options.clone()).is_some() {
                        return Err(IdbError::constraint(format!(
                            "An object store with the name '{name}' already exists."
                        )));
                    }
                }
                SchemaChange::Delete { name } => {
                    if staged.remove(name).is_none() {
                        return Err(IdbError::not_found(format!(
                            "No object store named '{name}' was found."
                        )));
                    }
                    deleted.push(name.clone());
                }
            }
        }

        if let Some(persist) = &self.persist {
            let stores = staged
                .iter()
                .map(|(store, options)| {
                    let next_key = match db.stores.get(store) {
                        Some(existing) if !deleted.contains(store) => existing.next_key,
                        _ => 1,
                    };
                    let persisted = PersistedStore {
                        options: options.clone(),
                        next_key,
                    };
                    (store.clone(), persisted)
                })
                .collect();
            let schema = PersistedDb { version, stores };
            persist.save_schema(name, &schema, &deleted)?;
        }

        for change in changes {
            match change {
                SchemaChange::Create { name, options } => {
                    db.stores.insert(
                        name,
                        StoreData {
                            options,
                            records: BTreeMap::new(),
                            next_key: 1,
                        },
                    );
                }
                SchemaChange::Delete { name } => {
                    db.stores.remove(&name);
                }
            }
        }
        db.version = version;
        debug!(db = name, version, "database upgraded");
        Ok(db.stores.keys().cloned().collect())
    }

    pub fn begin(&mut self, db: &str, scope: TransactionScope, now: Instant) -> IdbResult<u64> {
        let data = self
            .dbs
            .get(db)
            .ok_or_else(|| IdbError::not_found(format!("database '{db}' is not open")))?;
        if scope.stores().is_empty() {
            return Err(IdbError::invalid_state(
                "The transaction scope must name at least one object store.",
            ));
        }
        if let Some(missing) = scope.stores().iter().find(|s| !data.stores.contains_key(*s)) {
            return Err(IdbError::not_found(format!(
                "One of the specified object stores ('{missing}') was not found."
            )));
        }

        let id = self.next_id();
        let deadline = self.deadline(now);
        trace!(txn = id, %scope, "begin");
        self.txns.insert(
            id,
            TxnData {
                db: db.to_string(),
                scope,
                status: TxnStatus::Active,
                deltas: BTreeMap::new(),
                requests: 0,
                deadline,
                waiters: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Serve one store request. Failed requests leave the transaction active.
    pub fn request(
        &mut self,
        id: u64,
        store: &str,
        op: StoreOp,
        now: Instant,
    ) -> IdbResult<StoreReply> {
        let deadline = self.deadline(now);
        let budget = self.auto_commit.request_budget();
        let txn = match self.txns.get_mut(&id) {
            Some(txn) if txn.status == TxnStatus::Active => txn,
            _ => return Err(IdbError::transaction_inactive()),
        };
        if !txn.scope.contains(store) {
            return Err(IdbError::not_found(format!(
                "object store '{store}' is not in the transaction scope"
            )));
        }
        if op.is_write() && !txn.scope.mode().is_read_write() {
            return Err(IdbError::read_only("The transaction is read-only."));
        }
        txn.requests += 1;
        txn.deadline = deadline;
        let exhausted = budget.is_some_and(|limit| txn.requests >= limit);

        let reply = self.execute(id, store, op);

        if exhausted {
            self.commit(id, "request budget");
        }
        reply
    }

    fn execute(&mut self, id: u64, store: &str, op: StoreOp) -> IdbResult<StoreReply> {
        let Some(txn) = self.txns.get_mut(&id) else {
            return Err(IdbError::transaction_inactive());
        };
        let data = self
            .dbs
            .get(&txn.db)
            .and_then(|db| db.stores.get(store))
            .ok_or_else(|| IdbError::not_found(format!("object store '{store}' was deleted")))?;
        let delta = txn.deltas.get(store);

        let reply = match op {
            StoreOp::Put { value, key } => {
                let (key, value, next) = resolve_key(data, delta, value, key)?;
                let delta = txn.deltas.entry(store.to_string()).or_default();
                delta.writes.insert(key, Some(value));
                if next.is_some() {
                    delta.next_key = next;
                }
                StoreReply::Done
            }
            StoreOp::Add { value, key } => {
                let (key, value, next) = resolve_key(data, delta, value, key)?;
                if !merged(data, delta, &Query::Key(key.clone())).is_empty() {
                    return Err(IdbError::constraint(
                        "Key already exists in the object store.",
                    ));
                }
                let delta = txn.deltas.entry(store.to_string()).or_default();
                delta.writes.insert(key, Some(value));
                if next.is_some() {
                    delta.next_key = next;
                }
                StoreReply::Done
            }
            StoreOp::Delete(query) => {
                let doomed: Vec<Key> = merged(data, delta, &query).into_keys().collect();
                let delta = txn.deltas.entry(store.to_string()).or_default();
                for key in doomed {
                    delta.writes.insert(key, None);
                }
                StoreReply::Done
            }
            StoreOp::Clear => {
                let delta = txn.deltas.entry(store.to_string()).or_default();
                delta.cleared = true;
                delta.writes.clear();
                StoreReply::Done
            }
            StoreOp::Get(query) => {
                StoreReply::Value(merged(data, delta, &query).into_values().next())
            }
            StoreOp::GetKey(query) => {
                StoreReply::Key(merged(data, delta, &query).into_keys().next())
            }
            StoreOp::GetAll(query, count) => StoreReply::Values(
                merged(data, delta, &query)
                    .into_values()
                    .take(count_limit(count))
                    .collect(),
            ),
            StoreOp::GetAllKeys(query, count) => StoreReply::Keys(
                merged(data, delta, &query)
                    .into_keys()
                    .take(count_limit(count))
                    .collect(),
            ),
            StoreOp::Count(query) => StoreReply::Count(merged(data, delta, &query).len() as u64),
            StoreOp::OpenCursor(range) => {
                let entry = next_entry(data, delta, range.as_ref(), None);
                let cursor = self.next_id;
                self.next_id += 1;
                self.cursors.insert(
                    cursor,
                    CursorData {
                        txn: id,
                        store: store.to_string(),
                        range,
                        last: entry.as_ref().map(|e| e.key.clone()),
                    },
                );
                StoreReply::Cursor { id: cursor, entry }
            }
            StoreOp::Continue(cursor) => {
                let state = self
                    .cursors
                    .get_mut(&cursor)
                    .filter(|c| c.txn == id && c.store == store)
                    .ok_or_else(|| IdbError::invalid_state("The cursor is not known."))?;
                let entry = match &state.last {
                    Some(last) => next_entry(data, delta, state.range.as_ref(), Some(last)),
                    None => None,
                };
                if let Some(entry) = &entry {
                    state.last = Some(entry.key.clone());
                }
                StoreReply::Entry(entry)
            }
        };
        Ok(reply)
    }

    /// Commit `id` if it is still active. `reason` is only logged.
    pub fn commit(&mut self, id: u64, reason: &'static str) {
        let Some(txn) = self.txns.get_mut(&id) else {
            return;
        };
        if txn.status != TxnStatus::Active {
            return;
        }
        let deltas = std::mem::take(&mut txn.deltas);
        let db_name = txn.db.clone();

        let persisted = match (&self.persist, self.dbs.get(&db_name)) {
            (Some(persist), Some(db)) => {
                let next_keys = deltas
                    .iter()
                    .filter_map(|(store, delta)| delta.next_key.map(|n| (store.clone(), n)))
                    .collect();
                persist.commit(&db_name, &PersistedDb::from_data(db, &next_keys), &deltas)
            }
            _ => Ok(()),
        };
        if let Err(err) = persisted {
            debug!(txn = id, error = %err, "commit could not be persisted");
            self.finish(id, TxnStatus::Aborted(Some(err.to_string())));
            return;
        }

        if let Some(db) = self.dbs.get_mut(&db_name) {
            for (name, delta) in deltas {
                let Some(store) = db.stores.get_mut(&name) else {
                    continue;
                };
                if delta.cleared {
                    store.records.clear();
                }
                for (key, write) in delta.writes {
                    match write {
                        Some(value) => {
                            store.records.insert(key, value);
                        }
                        None => {
                            store.records.remove(&key);
                        }
                    }
                }
                if let Some(next) = delta.next_key {
                    store.next_key = store.next_key.max(next);
                }
            }
        }
        debug!(txn = id, reason, "transaction committed");
        self.finish(id, TxnStatus::Committed);
    }

    pub fn abort(&mut self, id: u64) {
        let active = self
            .txns
            .get(&id)
            .is_some_and(|txn| txn.status == TxnStatus::Active);
        if active {
            debug!(txn = id, "transaction aborted");
            self.finish(id, TxnStatus::Aborted(None));
        }
    }

    fn finish(&mut self, id: u64, status: TxnStatus) {
        let Some(txn) = self.txns.get_mut(&id) else {
            return;
        };
        txn.deltas.clear();
        txn.deadline = None;
        txn.status = status;
        for waiter in txn.waiters.drain(..) {
            match &txn.status {
                TxnStatus::Aborted(reason) => waiter.fail(aborted_error(reason)),
                _ => waiter.succeed(()),
            }
        }
        self.cursors.retain(|_, cursor| cursor.txn != id);
    }

    /// Answer `waiter` once `id` has finished
    pub fn wait_complete(&mut self, id: u64, waiter: Completer<()>) {
        match self.txns.get_mut(&id) {
            Some(txn) => match &txn.status {
                TxnStatus::Active => txn.waiters.push(waiter),
                TxnStatus::Committed => waiter.succeed(()),
                TxnStatus::Aborted(reason) => waiter.fail(aborted_error(reason)),
            },
            None => waiter.fail(IdbError::transaction_inactive()),
        }
    }

    /// Forget `id`; nothing can reach it any more, so it commits if active
    pub fn release(&mut self, id: u64) {
        self.commit(id, "released");
        self.txns.remove(&id);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.txns
            .values()
            .filter(|txn| txn.status == TxnStatus::Active)
            .filter_map(|txn| txn.deadline)
            .min()
    }

    /// Auto-commit every transaction idle past its deadline
    pub fn expire(&mut self, now: Instant) {
        let due: Vec<u64> = self
            .txns
            .iter()
            .filter(|(_, txn)| {
                txn.status == TxnStatus::Active && txn.deadline.is_some_and(|d| d <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.commit(id, "idle");
        }
    }

    pub fn shutdown(&mut self) {
        let active: Vec<u64> = self
            .txns
            .iter()
            .filter(|(_, txn)| txn.status == TxnStatus::Active)
            .map(|(id, _)| *id)
            .collect();
        for id in active {
            self.commit(id, "shutdown");
        }
    }

    #[cfg(test)]
    fn records(&self, db: &str, store: &str) -> Vec<(Key, Value)> {
        self.dbs
            .get(db)
            .and_then(|db| db.stores.get(store))
            .map(|s| {
                s.records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
