//! Saved window orderings, keyed by user-named window sets.
//!
//! The in-memory [`OrderingTable`] mirrors the `[windows]` section of the config file. It is only
//! ever replaced wholesale on reload, and every save writes the whole table back through the
//! [`OrderingCodec`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::signals::Flag;
use crate::window::Fingerprint;



/// One persisted label -> order-index entry
# [ derive (Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize) ]
pub struct OrderEntry {
    pub name  : String,
    pub order : usize,
}

impl OrderEntry {
    pub fn new (name:&str, order:usize) -> OrderEntry { OrderEntry { name: name.to_string(), order } }
}

/// Set key -> saved entries for that set
pub type OrderingTable = BTreeMap <String, Vec<OrderEntry>>;


/// The settings codec the store reads from and writes through
pub trait OrderingCodec : Send + Sync + 'static {
    fn load_orderings (&self) -> OrderingTable;
    fn save_orderings (&self, table:&OrderingTable) -> Result<()>;
}



# [ derive ( ) ]
pub struct _OrderingStore {
    table  : RwLock <OrderingTable>,
    writer : Mutex <()>,
    dirty  : Flag,
    codec  : Arc <dyn OrderingCodec>,
}

# [ derive (Clone) ]
pub struct OrderingStore ( Arc <_OrderingStore> );

impl Deref for OrderingStore {
    type Target = _OrderingStore;
    fn deref (&self) -> &Self::Target { &self.0 }
}

impl std::fmt::Debug for OrderingStore {
    fn fmt (&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderingStore") .field ("sets", &self.table.read().unwrap().len()) .finish_non_exhaustive()
    }
}



impl OrderingStore {

    pub fn new (codec: Arc<dyn OrderingCodec>) -> OrderingStore {
        let table = codec.load_orderings();
        OrderingStore ( Arc::new ( _OrderingStore {
            table  : RwLock::new (table),
            writer : Mutex::new (()),
            dirty  : Flag::default(),
            codec,
        } ) )
    }

    /// Re-reads the whole table from the codec, fully replacing what we had.
    /// Waits out any in-flight save, so a reload never lands between a save's table update and its write-back.
    pub fn reload (&self) {
        let _writer = self.writer.lock().unwrap();
        let table = self.codec.load_orderings();
        debug! ("ordering table reloaded with {} sets", table.len());
        *self.table.write().unwrap() = table;
        // whatever a failed write-back was holding is superseded by what's on disk now
        self.dirty.clear();
    }

    /// Whether the last write-back failed and the table still differs from what was persisted
    pub fn is_dirty (&self) -> bool { self.dirty.is_set() }

    /// Retries the write-back if the last one failed. Returns whether anything was written.
    pub fn flush_pending (&self) -> Result<bool> {
        let _writer = self.writer.lock().unwrap();
        if self.dirty.is_clear() { return Ok(false) }
        self.write_back (&self.snapshot())?;
        info! ("pending ordering write-back went through");
        Ok(true)
    }

    fn write_back (&self, table:&OrderingTable) -> Result<()> {
        match self.codec.save_orderings (table) {
            Ok(()) => { self.dirty.clear(); Ok(()) }
            Err(e) => {
                warn! ("ordering write-back failed: {}", e);
                self.dirty.set();
                Err(e)
            }
        }
    }

    pub fn snapshot (&self) -> OrderingTable {
        self.table.read().unwrap().clone()
    }

    /// Finds the stored set whose label set is exactly the fingerprint.
    /// If several stored sets match, the first in key order wins.
    pub fn compute_key (&self, fp:&Fingerprint) -> Option<String> {
        if fp.is_empty() { return None }
        Self::find_key (&self.table.read().unwrap(), fp)
    }

    fn find_key (table:&OrderingTable, fp:&Fingerprint) -> Option<String> {
        table .iter() .find (|(_, entries)| {
            Fingerprint::from_names (entries.iter().map(|e| &e.name)) == *fp
        } ) .map (|(k,_)| k.clone())
    }

    /// Label -> order for the set stored under this fingerprint, None on a lookup miss
    pub fn lookup (&self, fp:&Fingerprint) -> Option <(String, HashMap<String, usize>)> {
        if fp.is_empty() { return None }
        let table = self.table.read().unwrap();
        let key = Self::find_key (&table, fp)?;
        let orders = table .get(&key) .map (|entries| {
            entries .iter() .map (|e| (e.name.clone(), e.order)) .collect::<HashMap<_,_>>()
        } ) .unwrap_or_default();
        Some ((key, orders))
    }

    /// Stores `entries` under `key`, dropping whichever other key held this same label set.
    ///
    /// Returns Ok(false) without touching anything when there's nothing to save. The in-memory
    /// table is updated even when the write-back fails, and is marked dirty for [`Self::flush_pending`].
    pub fn save (&self, key:&str, entries:Vec<OrderEntry>) -> Result<bool> {
        if entries.is_empty() {
            debug! ("skipping ordering save for an empty window set");
            return Ok(false)
        }
        let _writer = self.writer.lock().unwrap();

        let fp = Fingerprint::from_names (entries.iter().map(|e| &e.name));
        let table = {
            let mut table = self.table.write().unwrap();
            if let Some(prev_key) = Self::find_key (&table, &fp) {
                if prev_key != key {
                    info! ("renaming window set '{}' to '{}'", prev_key, key);
                    table.remove (&prev_key);
            } }
            table.insert (key.to_string(), entries);
            table.clone()
        };
        // ^^ the table lock is released before the (slower) write-back, the writer lock keeps saves and reloads in sequence

        self.write_back (&table)?;
        info! ("saved ordering for window set '{}'", key);
        Ok(true)
    }

}




#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::MemCodec;
    use crate::window::WindowLabel;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use crossbeam_channel::{bounded, Receiver, Sender};

    fn fp (names:&[&str]) -> Fingerprint { Fingerprint::from_names (names) }

    fn store_with (sets:&[(&str, &[(&str, usize)])]) -> (OrderingStore, Arc<MemCodec>) {
        let codec = Arc::new (MemCodec::default());
        {
            let mut t = codec.table.lock().unwrap();
            for (k, entries) in sets {
                t.insert (k.to_string(), entries.iter().map(|(n,o)| OrderEntry::new(n,*o)).collect());
            }
        }
        (OrderingStore::new (codec.clone()), codec)
    }

    #[test]
    fn compute_key_is_permutation_invariant() {
        let (store, _) = store_with (&[("team", &[("a",0), ("b",1), ("c",2)])]);
        let labels = ["c","a","b"].map (|s| WindowLabel::Named(s.into()));
        assert_eq!(store.compute_key (&Fingerprint::from_labels(&labels)), Some("team".to_string()));
        assert_eq!(store.compute_key (&fp(&["b","c","a"])), Some("team".to_string()));
    }

    #[test]
    fn compute_key_requires_exact_label_set() {
        let (store, _) = store_with (&[("team", &[("a",0), ("b",1)])]);
        assert_eq!(store.compute_key (&fp(&["a"])), None);
        assert_eq!(store.compute_key (&fp(&["a","b","c"])), None);
        assert_eq!(store.compute_key (&fp(&[])), None);
    }

    #[test]
    fn lookup_returns_label_orders() {
        let (store, _) = store_with (&[("team", &[("a",3), ("b",1)])]);
        let (key, orders) = store.lookup (&fp(&["b","a"])).unwrap();
        assert_eq!(key, "team");
        assert_eq!(orders.get("a"), Some(&3));
        assert_eq!(orders.get("b"), Some(&1));
        assert!(store.lookup (&fp(&["z"])).is_none());
    }

    #[test]
    fn saving_under_new_key_drops_the_old_one() {
        let (store, codec) = store_with (&[("old", &[("a",0), ("b",1)]), ("other", &[("x",0)])]);
        assert!(store.save ("new", vec![OrderEntry::new("b",0), OrderEntry::new("a",1)]).unwrap());
        let t = codec.table.lock().unwrap().clone();
        assert_eq!(t.keys().cloned().collect::<Vec<_>>(), vec!["new".to_string(), "other".to_string()]);
        assert_eq!(t["new"], vec![OrderEntry::new("b",0), OrderEntry::new("a",1)]);
    }

    #[test]
    fn empty_sets_are_never_saved() {
        let (store, codec) = store_with (&[]);
        assert!(!store.save ("k", vec![]).unwrap());
        assert_eq!(codec.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_write_keeps_the_in_memory_change() {
        let (store, codec) = store_with (&[]);
        codec.fail.store (true, Ordering::SeqCst);
        assert!(matches!(store.save ("k", vec![OrderEntry::new("a",0)]), Err(Error::Persist{..})));
        assert_eq!(store.compute_key (&fp(&["a"])), Some("k".to_string()));
        codec.fail.store (false, Ordering::SeqCst);
        assert!(store.save ("k", vec![OrderEntry::new("a",0)]).unwrap());
        assert_eq!(codec.table.lock().unwrap().len(), 1);
    }

    #[test]
    fn reload_replaces_rather_than_merges() {
        let (store, codec) = store_with (&[("a", &[("x",0)])]);
        {
            let mut t = codec.table.lock().unwrap();
            t.clear();
            t.insert ("b".into(), vec![OrderEntry::new("y",0)]);
        }
        store.reload();
        assert_eq!(store.snapshot().keys().cloned().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[test]
    fn failed_write_stays_pending_until_flushed() {
        let (store, codec) = store_with (&[]);
        codec.fail.store (true, Ordering::SeqCst);
        assert!(store.save ("k", vec![OrderEntry::new("a",0)]).is_err());
        assert!(store.is_dirty());
        assert!(store.flush_pending().is_err());

        codec.fail.store (false, Ordering::SeqCst);
        assert!(store.flush_pending().unwrap());
        assert!(!store.is_dirty());
        assert_eq!(codec.set("k"), Some(vec![OrderEntry::new("a",0)]));
        assert!(!store.flush_pending().unwrap());
        assert_eq!(codec.writes.load(Ordering::SeqCst), 1);
    }

    /// Codec whose write-back parks until the test lets it through
    struct GatedCodec {
        inner   : MemCodec,
        entered : Sender<()>,
        release : Receiver<()>,
    }

    impl OrderingCodec for GatedCodec {
        fn load_orderings (&self) -> OrderingTable { self.inner.load_orderings() }
        fn save_orderings (&self, table:&OrderingTable) -> Result<()> {
            let _ = self.entered.send (());
            let _ = self.release.recv();
            self.inner.save_orderings (table)
        }
    }

    #[test]
    fn reload_waits_for_an_in_flight_save() {
        let (entered_tx, entered_rx) = bounded (1);
        let (release_tx, release_rx) = bounded (1);
        let codec = Arc::new (GatedCodec { inner: MemCodec::default(), entered: entered_tx, release: release_rx });
        let store = OrderingStore::new (codec.clone());

        let saver = { let s = store.clone();
            std::thread::spawn (move || s.save ("team", vec![OrderEntry::new("a",0), OrderEntry::new("b",1)]))
        };
        entered_rx.recv_timeout (Duration::from_secs(2)).unwrap();

        // the save has updated the table but not written it yet
        let reloader = { let s = store.clone(); std::thread::spawn (move || s.reload()) };
        std::thread::sleep (Duration::from_millis(50));
        assert!(!reloader.is_finished());

        release_tx.send (()).unwrap();
        assert!(saver.join().unwrap().unwrap());
        reloader.join().unwrap();

        assert!(codec.inner.set("team").is_some());
        assert_eq!(store.compute_key (&fp(&["b","a"])), Some("team".to_string()));
    }
}
