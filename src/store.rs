//! Storage layer.
//!
//! `Tables` is the relational state the engine works on: users, items, exchange
//! requests, disputes, wishlist, item history and the point ledger. The `Store`
//! trait wraps it in transactions: a closure runs against a staged copy and the
//! copy replaces the live tables only when the closure returns `Ok`. A failed
//! transition therefore leaves nothing behind, however far it got.
//!
//! The staged copy is cheap. Committed rows sit behind shared `Arc`s in `Rows`
//! and `AppendLog`; a transaction only copies the rows it touches and buffers
//! its appends, and `seal` folds them into the shared state at commit.
//!
//! `MemoryStore` serialises writers on one `RwLock`, which gives the
//! read-check-write sequences in the engine serializable isolation.

use crate::cycle::Obligation;
use crate::exchange::{Dispute, ExchangeRequest, ExchangeStatus};
use crate::item::{HistoryRecord, Item};
use crate::ledger::Ledger;
use crate::types::{DisputeId, ExchangeId, ItemId, Timestamp, UserId};
use crate::valuation::DemandSignals;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as KeyOrder;
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("transaction aborted at commit: {0}")]
    CommitAborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub joined_at: Timestamp,
}

// 9.0: copy-on-write building blocks

/// Keyed rows: committed rows shared behind an `Arc`, staged writes on top.
/// A `None` in `dirty` is a staged delete.
#[derive(Debug, Clone)]
pub struct Rows<K, V> {
    base: Arc<BTreeMap<K, V>>,
    dirty: BTreeMap<K, Option<V>>,
}

impl<K, V> Default for Rows<K, V> {
    fn default() -> Self {
        Self {
            base: Arc::new(BTreeMap::new()),
            dirty: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Rows<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.dirty.get(key) {
            Some(row) => row.as_ref(),
            None => self.base.get(key),
        }
    }

    /// Copies the committed row into the staged set on first write.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.dirty.contains_key(key) {
            let row = self.base.get(key)?.clone();
            self.dirty.insert(key.clone(), Some(row));
        }
        self.dirty.get_mut(key).and_then(Option::as_mut)
    }

    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        if !self.dirty.contains_key(&key) {
            let committed = self.base.get(&key).cloned();
            self.dirty.insert(key.clone(), committed);
        }
        self.dirty.entry(key).or_default().get_or_insert_with(V::default)
    }

    pub fn insert(&mut self, key: K, value: V) -> &mut V {
        self.dirty.entry(key).or_default().insert(value)
    }

    pub fn remove(&mut self, key: &K) {
        self.dirty.insert(key.clone(), None);
    }

    /// Rows in key order, staged writes shadowing committed ones.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut base = self.base.iter().peekable();
        let mut dirty = self.dirty.iter().peekable();
        std::iter::from_fn(move || loop {
            let order = match (base.peek(), dirty.peek()) {
                (None, None) => return None,
                (Some(_), None) => KeyOrder::Less,
                (None, Some(_)) => KeyOrder::Greater,
                (Some((b, _)), Some((d, _))) => b.cmp(d),
            };
            if order == KeyOrder::Less {
                return base.next();
            }
            if order == KeyOrder::Equal {
                base.next();
            }
            if let Some((key, Some(value))) = dirty.next() {
                return Some((key, value));
            }
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        if self.dirty.is_empty() {
            self.base.len()
        } else {
            self.iter().count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Folds staged writes into the committed rows. Only copies the shared map if
    /// another holder still references it.
    pub fn seal(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let base = Arc::make_mut(&mut self.base);
        for (key, row) in mem::take(&mut self.dirty) {
            match row {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
    }
}

/// Append-only log: sealed records shared behind an `Arc`, new ones buffered.
#[derive(Debug, Clone)]
pub struct AppendLog<T> {
    sealed: Arc<Vec<T>>,
    pending: Vec<T>,
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self {
            sealed: Arc::new(Vec::new()),
            pending: Vec::new(),
        }
    }
}

impl<T: Clone> AppendLog<T> {
    pub fn push(&mut self, record: T) {
        self.pending.push(record);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.sealed.iter().chain(self.pending.iter())
    }

    pub fn len(&self) -> usize {
        self.sealed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seal(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = mem::take(&mut self.pending);
        Arc::make_mut(&mut self.sealed).extend(pending);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    user: u64,
    item: u64,
    exchange: u64,
    dispute: u64,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    users: Rows<UserId, UserRecord>,
    items: Rows<ItemId, Item>,
    exchanges: Rows<ExchangeId, ExchangeRequest>,
    disputes: Rows<DisputeId, Dispute>,
    wishlist: Rows<ItemId, BTreeSet<UserId>>,
    history: AppendLog<HistoryRecord>,
    ledger: Ledger,
    sequences: Sequences,
}

impl Tables {
    pub fn new() -> Self {
        Self {
            ledger: Ledger::new(),
            ..Default::default()
        }
    }

    /// Makes every staged write part of the committed state.
    pub fn seal(&mut self) {
        self.users.seal();
        self.items.seal();
        self.exchanges.seal();
        self.disputes.seal();
        self.wishlist.seal();
        self.history.seal();
        self.ledger.seal();
    }

    // users

    pub fn insert_user(&mut self, name: &str, at: Timestamp) -> UserId {
        let id = UserId(bump(&mut self.sequences.user));
        self.users.insert(
            id,
            UserRecord {
                id,
                name: name.to_string(),
                joined_at: at,
            },
        );
        id
    }

    pub fn user(&self, id: UserId) -> Option<&UserRecord> {
        self.users.get(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.users.keys().copied()
    }

    // items

    pub fn next_item_id(&mut self) -> ItemId {
        ItemId(bump(&mut self.sequences.item))
    }

    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id, item);
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> + '_ {
        self.items.values()
    }

    pub fn items_owned_by(&self, owner: UserId) -> impl Iterator<Item = &Item> + '_ {
        self.items.values().filter(move |i| i.owner_id == owner)
    }

    /// Available items of the same work (title+author, case-insensitive).
    pub fn available_copies(&self, title: &str, author: &str) -> u32 {
        let count = self
            .items
            .values()
            .filter(|i| i.available && i.same_work(title, author))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    // exchanges

    pub fn insert_exchange(
        &mut self,
        build: impl FnOnce(ExchangeId) -> ExchangeRequest,
    ) -> &ExchangeRequest {
        let id = ExchangeId(bump(&mut self.sequences.exchange));
        self.exchanges.insert(id, build(id))
    }

    pub fn exchange(&self, id: ExchangeId) -> Option<&ExchangeRequest> {
        self.exchanges.get(&id)
    }

    pub fn exchange_mut(&mut self, id: ExchangeId) -> Option<&mut ExchangeRequest> {
        self.exchanges.get_mut(&id)
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeRequest> + '_ {
        self.exchanges.values()
    }

    pub fn exchanges_on_item(&self, item_id: ItemId) -> impl Iterator<Item = &ExchangeRequest> + '_ {
        self.exchanges.values().filter(move |e| e.item_id == item_id)
    }

    pub fn exchanges_with_status(&self, status: ExchangeStatus) -> impl Iterator<Item = &ExchangeRequest> + '_ {
        self.exchanges.values().filter(move |e| e.status == status)
    }

    pub fn active_exchanges_on_item(&self, item_id: ItemId) -> impl Iterator<Item = &ExchangeRequest> + '_ {
        self.exchanges_on_item(item_id).filter(|e| e.status.is_active())
    }

    /// Obligation edges from every PENDING/APPROVED request, optionally leaving one out.
    pub fn active_obligations(&self, exclude: Option<ExchangeId>) -> Vec<Obligation> {
        self.exchanges
            .values()
            .filter(|e| e.status.is_active() && Some(e.id) != exclude)
            .map(|e| Obligation {
                exchange_id: e.id,
                requester: e.requester_id,
                owner: e.owner_id,
            })
            .collect()
    }

    pub fn exchanges_involving(&self, user_id: UserId) -> impl Iterator<Item = &ExchangeRequest> + '_ {
        self.exchanges.values().filter(move |e| e.involves(user_id))
    }

    // disputes

    pub fn insert_dispute(&mut self, build: impl FnOnce(DisputeId) -> Dispute) -> &Dispute {
        let id = DisputeId(bump(&mut self.sequences.dispute));
        self.disputes.insert(id, build(id))
    }

    pub fn dispute(&self, id: DisputeId) -> Option<&Dispute> {
        self.disputes.get(&id)
    }

    pub fn dispute_mut(&mut self, id: DisputeId) -> Option<&mut Dispute> {
        self.disputes.get_mut(&id)
    }

    pub fn open_dispute_for(&self, exchange_id: ExchangeId) -> Option<&Dispute> {
        self.disputes
            .values()
            .find(|d| d.exchange_id == exchange_id && d.is_open())
    }

    pub fn disputes_for(&self, exchange_id: ExchangeId) -> impl Iterator<Item = &Dispute> + '_ {
        self.disputes.values().filter(move |d| d.exchange_id == exchange_id)
    }

    // wishlist

    /// Returns false if the user already wished for the item.
    pub fn add_wish(&mut self, user_id: UserId, item_id: ItemId) -> bool {
        self.wishlist.get_or_default(item_id).insert(user_id)
    }

    pub fn remove_wish(&mut self, user_id: UserId, item_id: ItemId) -> bool {
        let Some(users) = self.wishlist.get_mut(&item_id) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.wishlist.remove(&item_id);
        }
        removed
    }

    pub fn wishlist_count(&self, item_id: ItemId) -> u32 {
        self.wishlist
            .get(&item_id)
            .map_or(0, |users| u32::try_from(users.len()).unwrap_or(u32::MAX))
    }

    pub fn interested_users(&self, item_id: ItemId) -> Vec<UserId> {
        self.wishlist
            .get(&item_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    // history

    pub fn record_history(&mut self, record: HistoryRecord) {
        self.history.push(record);
    }

    pub fn history_for(&self, item_id: ItemId) -> impl Iterator<Item = &HistoryRecord> + '_ {
        self.history.iter().filter(move |h| h.item_id == item_id)
    }

    // ledger

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    // valuation inputs

    pub fn demand_signals(&self, item: &Item) -> DemandSignals {
        let count = |status_active: bool| -> u32 {
            let n = self
                .exchanges_on_item(item.id)
                .filter(|e| {
                    if status_active {
                        e.status.is_active()
                    } else {
                        e.status == ExchangeStatus::Completed
                    }
                })
                .count();
            u32::try_from(n).unwrap_or(u32::MAX)
        };

        DemandSignals {
            wishlist_count: self.wishlist_count(item.id),
            active_requests: count(true),
            completed_exchanges: count(false),
            copies_available: self.available_copies(&item.title, &item.author).max(1),
        }
    }
}

/// Transactional access to `Tables`.
pub trait Store: Send + Sync {
    /// Consistent read of the committed state.
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError>;

    /// All-or-nothing read-modify-write. Writes become visible only if `f` returns `Ok`
    /// and the commit succeeds.
    fn transact<R, E>(&self, f: impl FnOnce(&mut Tables) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>;
}

/// Injected storage failure, for exercising retry paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// every read and transaction fails up front
    Offline,
    /// transactions run but are thrown away at commit
    AbortCommits,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fault: RwLock<Option<Fault>>,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            fault: RwLock::new(None),
            commits: AtomicU64::new(0),
        }
    }

    pub fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.write() = fault;
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn current_fault(&self) -> Option<Fault> {
        *self.fault.read()
    }
}

impl Store for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        if self.current_fault() == Some(Fault::Offline) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(f(&self.tables.read()))
    }

    fn transact<R, E>(&self, f: impl FnOnce(&mut Tables) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        if self.current_fault() == Some(Fault::Offline) {
            return Err(StoreError::Unavailable("store offline".to_string()).into());
        }

        let mut live = self.tables.write();
        let mut staged = live.clone();
        let result = f(&mut staged)?;

        if self.current_fault() == Some(Fault::AbortCommits) {
            return Err(StoreError::CommitAborted("injected fault".to_string()).into());
        }

        // the old tables go first so the shared rows are uniquely held when sealed
        *live = staged;
        live.seal();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EntryCategory, Posting};
    use crate::types::{Condition, Points};

    fn tables_with_item() -> (Tables, UserId, ItemId) {
        let mut tables = Tables::new();
        let owner = tables.insert_user("ana", Timestamp::from_millis(0));
        let item_id = tables.next_item_id();
        tables.insert_item(Item::new(
            item_id,
            owner,
            "Dune",
            "Frank Herbert",
            Condition::Good,
            Points::new(14),
            Timestamp::from_millis(0),
        ));
        (tables, owner, item_id)
    }

    #[test]
    fn sequences_start_at_one() {
        let (mut tables, owner, item_id) = tables_with_item();
        assert_eq!(owner, UserId(1));
        assert_eq!(item_id, ItemId(1));
        let second = tables.insert_user("ben", Timestamp::from_millis(0));
        assert_eq!(second, UserId(2));
    }

    #[test]
    fn copies_counted_case_insensitively_among_available() {
        let (mut tables, owner, _) = tables_with_item();
        let other = tables.next_item_id();
        tables.insert_item(Item::new(
            other,
            owner,
            "DUNE",
            "frank herbert",
            Condition::Poor,
            Points::new(3),
            Timestamp::from_millis(0),
        ));
        assert_eq!(tables.available_copies("dune", "Frank Herbert"), 2);

        tables.item_mut(other).unwrap().available = false;
        assert_eq!(tables.available_copies("dune", "Frank Herbert"), 1);
    }

    #[test]
    fn wishlist_add_is_idempotent() {
        let (mut tables, owner, item_id) = tables_with_item();
        assert!(tables.add_wish(owner, item_id));
        assert!(!tables.add_wish(owner, item_id));
        assert_eq!(tables.wishlist_count(item_id), 1);
        assert!(tables.remove_wish(owner, item_id));
        assert!(!tables.remove_wish(owner, item_id));
        assert_eq!(tables.wishlist_count(item_id), 0);
    }

    #[test]
    fn staged_rows_shadow_committed_rows() {
        let mut rows: Rows<u64, &str> = Rows::default();
        rows.insert(1, "a");
        rows.insert(3, "c");
        rows.seal();

        let mut staged = rows.clone();
        staged.insert(2, "b");
        *staged.get_mut(&3).unwrap() = "C";
        staged.remove(&1);
        assert_eq!(staged.iter().collect::<Vec<_>>(), vec![(&2, &"b"), (&3, &"C")]);
        assert_eq!(staged.len(), 2);
        assert_eq!(staged.get(&1), None);

        // the committed side is untouched until sealed
        assert_eq!(rows.values().copied().collect::<Vec<_>>(), vec!["a", "c"]);
        staged.seal();
        assert_eq!(staged.values().copied().collect::<Vec<_>>(), vec!["b", "C"]);
    }

    #[test]
    fn append_log_buffers_until_sealed() {
        let mut log: AppendLog<u32> = AppendLog::default();
        log.push(1);
        log.seal();
        let mut staged = log.clone();
        staged.push(2);
        assert_eq!(staged.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(staged.iter().rev().next(), Some(&2));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn commit_does_not_copy_untouched_tables() {
        let store = MemoryStore::new();
        let owner = store
            .transact(|t| Ok::<_, StoreError>(t.insert_user("ana", Timestamp::from_millis(0))))
            .unwrap();
        for i in 0..50 {
            store
                .transact(|t| {
                    t.record_history(HistoryRecord {
                        item_id: ItemId(1),
                        user_id: owner,
                        action: crate::item::ItemAction::Listed,
                        notes: format!("entry {i}"),
                        at: Timestamp::from_millis(i),
                    });
                    Ok::<_, StoreError>(())
                })
                .unwrap();
        }
        let items = store.read(|t| Arc::as_ptr(&t.items.base)).unwrap();
        let history = store.read(|t| Arc::as_ptr(&t.history.sealed)).unwrap();

        store
            .transact(|t| Ok::<_, StoreError>(t.insert_user("ben", Timestamp::from_millis(1))))
            .unwrap();
        store
            .transact(|t| {
                t.record_history(HistoryRecord {
                    item_id: ItemId(1),
                    user_id: owner,
                    action: crate::item::ItemAction::Listed,
                    notes: "one more".to_string(),
                    at: Timestamp::from_millis(60),
                });
                Ok::<_, StoreError>(())
            })
            .unwrap();

        // the history grew in place and the untouched items map is the same allocation
        assert_eq!(store.read(|t| Arc::as_ptr(&t.items.base)).unwrap(), items);
        assert_eq!(store.read(|t| Arc::as_ptr(&t.history.sealed)).unwrap(), history);
        assert_eq!(store.read(|t| t.history_for(ItemId(1)).count()).unwrap(), 51);
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let user = store
            .transact(|t| Ok::<_, StoreError>(t.insert_user("ana", Timestamp::from_millis(0))))
            .unwrap();

        let result: Result<(), StoreError> = store.transact(|t| {
            t.ledger_mut()
                .post(
                    Posting::new(user, Points::new(10), EntryCategory::Bonus, "welcome"),
                    Timestamp::from_millis(1),
                )
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Err(StoreError::Unavailable("late failure".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|t| t.ledger().balance(user)).unwrap(), Points::zero());
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn injected_faults() {
        let store = MemoryStore::new();
        store.set_fault(Some(Fault::Offline));
        assert!(store.read(|t| t.user_count()).is_err());

        store.set_fault(Some(Fault::AbortCommits));
        let result = store.transact(|t| Ok::<_, StoreError>(t.insert_user("ana", Timestamp::from_millis(0))));
        assert!(matches!(result, Err(StoreError::CommitAborted(_))));

        store.set_fault(None);
        assert_eq!(store.read(|t| t.user_count()).unwrap(), 0);
    }
}
