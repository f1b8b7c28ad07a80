#![ allow (non_camel_case_types) ]

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ordering::{OrderEntry, OrderingStore};
use crate::reorder;
use crate::signals::{Notifier, Subscription};
use crate::window::{Fingerprint, Hwnd, LabelRules, ManagedWindow, RawWindow, WindowLabel, WindowSource};



/// What the engine needs to know from configs to enumerate and label windows
# [ derive (Debug, Eq, PartialEq, Clone) ]
pub struct EngineSettings {
    pub process_filter : String,
    pub labels         : LabelRules,
}

impl Default for EngineSettings {
    fn default () -> Self {
        EngineSettings { process_filter: "Dofus.exe".to_string(), labels: LabelRules::default() }
    }
}

impl EngineSettings {
    pub fn from_config (conf:&Config) -> EngineSettings {
        EngineSettings {
            process_filter : conf.get_process_filter(),
            labels         : LabelRules { delimiter: conf.get_label_delimiter(), marker: conf.get_placeholder_marker() },
        }
    }
}



/// The authoritative model of which windows exist and in what order
# [ derive (Debug, Default, Clone) ]
pub struct Snapshot {
    pub windows : HashMap <Hwnd, ManagedWindow>,
    /// live handles in the order the last enumeration reported them (the stable-sort base)
    pub live    : Vec <Hwnd>,
    /// live handles by ascending order index
    pub sorted  : Vec <Hwnd>,
    pub active  : Option <Hwnd>,
    /// stored set key the current fingerprint resolved to, if any
    pub set_key : Option <String>,
}


/// Outcome of one reconciliation pass
# [ derive (Debug, Default, Eq, PartialEq, Clone) ]
pub struct WindowSetDiff {
    pub added   : Vec <Hwnd>,
    pub removed : Vec <Hwnd>,
    pub renamed : Vec <Hwnd>,
    pub changed : bool,
}



# [ derive (Debug, Eq, PartialEq, Clone, Serialize, Deserialize) ]
pub struct RenderRow {
    pub hwnd   : Hwnd,
    pub label  : String,
    pub order  : usize,
    pub active : bool,
}

# [ derive (Debug, Eq, PartialEq, Default, Clone, Serialize, Deserialize) ]
pub struct RenderList_Pl {
    pub rows    : Vec <RenderRow>,
    pub set_key : String,
}



# [ derive ( ) ]
pub struct _Engine {
    pub(crate) state    : Mutex <Snapshot>,
    pub(crate) settings : RwLock <EngineSettings>,
    pub(crate) source   : Arc <dyn WindowSource>,
    pub(crate) store    : OrderingStore,
    pub(crate) changes  : Notifier,
}

# [ derive (Clone) ]
pub struct Engine ( Arc <_Engine> );

impl Deref for Engine {
    type Target = _Engine;
    fn deref (&self) -> &Self::Target { &self.0 }
}

impl std::fmt::Debug for Engine {
    fn fmt (&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine") .field ("settings", &*self.settings.read().unwrap()) .finish_non_exhaustive()
    }
}




impl Engine {

    pub fn new (source: Arc<dyn WindowSource>, store: OrderingStore, settings: EngineSettings) -> Engine {
        Engine ( Arc::new ( _Engine {
            state    : Mutex::new (Snapshot::default()),
            settings : RwLock::new (settings),
            source, store,
            changes  : Notifier::new ("engine"),
        } ) )
    }

    pub fn store (&self) -> &OrderingStore { &self.store }

    pub fn update_settings (&self, settings:EngineSettings) {
        let mut cur = self.settings.write().unwrap();
        if *cur != settings {
            info! ("engine settings updated: {:?}", &settings);
            *cur = settings;
        }
    }

    pub fn settings (&self) -> EngineSettings {
        self.settings.read().unwrap().clone()
    }

    fn label_rules (&self) -> LabelRules {
        self.settings.read().unwrap().labels.clone()
    }

    pub(crate) fn lock_state (&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap()
    }



    /*****  reconciliation  ******/

    /// One poll cycle: re-enumerate, diff against the model, and on any structural change
    /// re-resolve the saved ordering, re-sort, and signal the change.
    pub fn reconcile (&self) -> WindowSetDiff {
        let filter = self.settings.read().unwrap().process_filter.clone();

        // enumeration can be slow, so its done before we take the state lock
        let mut seen = HashSet::new();
        let live = self.source.list_windows (&filter) .into_iter()
            .filter (|rw| seen.insert (rw.hwnd)) .collect::<Vec<RawWindow>>();

        let diff = {
            let mut snap = self.lock_state();
            let diff = Self::diff (&snap, &live);
            if !diff.changed {
                debug! ("poll: {} windows, no change", live.len());
                return diff
            }
            self.apply_live (&mut snap, &live, &diff);
            diff
        };
        info! ( "window set changed: +{:?} -{:?} renamed {:?}", diff.added, diff.removed, diff.renamed );
        self.changes.notify();

        // an ordering whose write-back failed earlier gets another go on each structural change
        if let Err(e) = self.store.flush_pending() {
            warn! ("ordering still not persisted: {}", e);
        }
        diff
    }

    fn diff (snap:&Snapshot, live:&[RawWindow]) -> WindowSetDiff {
        let live_set = live .iter() .map (|rw| rw.hwnd) .collect::<HashSet<Hwnd>>();
        let added = live .iter() .filter (|rw| !snap.windows.contains_key(&rw.hwnd)) .map (|rw| rw.hwnd) .collect::<Vec<_>>();
        let renamed = live .iter()
            .filter (|rw| snap.windows.get(&rw.hwnd) .is_some_and (|w| w.cached_title != rw.title))
            .map (|rw| rw.hwnd) .collect::<Vec<_>>();
        let mut removed = snap.windows.keys() .filter (|h| !live_set.contains(h)) .copied() .collect::<Vec<_>>();
        removed.sort();
        let changed = !added.is_empty() || !removed.is_empty() || !renamed.is_empty() || live.len() != snap.sorted.len();
        WindowSetDiff { added, removed, renamed, changed }
    }

    fn apply_live (&self, snap:&mut Snapshot, live:&[RawWindow], diff:&WindowSetDiff) {
        diff.removed .iter() .for_each (|h| { snap.windows.remove(h); });
        for rw in live {
            match snap.windows.get_mut (&rw.hwnd) {
                Some(w) => { w.observe_title (&rw.title); w.pid = rw.pid; }
                None    => { snap.windows.insert (rw.hwnd, ManagedWindow::from_raw(rw)); }
            }
        }
        snap.live = live .iter() .map (|rw| rw.hwnd) .collect();

        // an active window that went away doesnt stay active
        if snap.active .is_some_and (|h| !snap.windows.contains_key(&h)) { snap.active = None }

        self.restore_order_locked (snap);
        Self::sort_locked (snap);

        if snap.active.is_none() { snap.active = snap.sorted.first().copied() }
    }


    /// Re-applies the saved ordering to the current windows without re-enumerating
    /// (used when the ordering table was reloaded from disk)
    pub fn restore_order (&self) {
        {
            let mut snap = self.lock_state();
            self.restore_order_locked (&mut snap);
            Self::sort_locked (&mut snap);
        }
        self.changes.notify();
    }

    fn restore_order_locked (&self, snap:&mut Snapshot) {
        let rules = self.label_rules();
        let labels = snap.live .iter() .filter_map (|h| snap.windows.get(h))
            .map (|w| (w.hwnd, WindowLabel::derive (&w.title, &rules))) .collect::<Vec<_>>();
        let fp = Fingerprint::from_labels (labels.iter().map(|(_,l)| l));

        match self.store.lookup (&fp) {
            None => {
                // never-seen set: everything collapses to 0 and the stable sort leaves enumeration order
                debug! ("no saved ordering for {:?}", fp.names());
                snap.windows .values_mut() .for_each (|w| w.order = 0);
                snap.set_key = None;
            }
            Some ((key, orders)) => {
                debug! ("restoring ordering of window set '{}'", key);
                for (hwnd, label) in labels.iter() {
                    let order = label.name() .and_then (|n| orders.get(n)) .copied() .unwrap_or(0);
                    if let Some(w) = snap.windows.get_mut(hwnd) { w.order = order }
                }
                snap.set_key = Some(key);
            }
        }
    }

    /// Stable sort of the live handles by order index, then renumbers indices densely
    pub(crate) fn sort_locked (snap:&mut Snapshot) {
        let mut sorted = snap.live.clone();
        sorted .sort_by_key (|h| snap.windows.get(h) .map (|w| w.order) .unwrap_or (usize::MAX));
        for (i, h) in sorted.iter().enumerate() {
            if let Some(w) = snap.windows.get_mut(h) { w.order = i }
        }
        snap.sorted = sorted;
    }



    /*****  ordering mutations and persistence  ******/

    /// Moves a window by `step` slots (clamped to the ends), shifting the windows in between,
    /// and persists the new ordering. Returns whether anything moved.
    ///
    /// The model keeps the move even if persisting it fails.
    pub fn move_window (&self, hwnd:Hwnd, step:i64) -> Result<bool> {
        let saved = {
            let mut snap = self.lock_state();
            let n = snap.sorted.len();
            if n < 2 { return Ok(false) }
            let Some(origin) = snap.windows.get(&hwnd) .map (|w| w.order) else { return Ok(false) };
            let target = reorder::clamp_target (origin, step, n);
            if target == origin { return Ok(false) }

            debug! ("moving {:?} from slot {} to {}", hwnd, origin, target);
            reorder::apply_move (snap.windows.values_mut().map(|w| &mut w.order), origin, target);
            Self::sort_locked (&mut snap);
            self.persist_locked (&mut snap, None)
        };
        self.changes.notify();
        saved.map (|_| true)
    }

    /// Saves the current ordering under a user-chosen set name
    pub fn save_order (&self, set_key:&str) -> Result<()> {
        if set_key.is_empty() { return Err (Error::EmptySetKey) }
        let saved = {
            let mut snap = self.lock_state();
            let saved = self.persist_locked (&mut snap, Some(set_key));
            self.restore_order_locked (&mut snap);
            Self::sort_locked (&mut snap);
            saved
        };
        self.changes.notify();
        saved.map (|_| ())
    }

    fn persist_locked (&self, snap:&mut Snapshot, set_key:Option<&str>) -> Result<bool> {
        let rules = self.label_rules();
        let entries = snap.sorted .iter() .filter_map (|h| snap.windows.get(h))
            .filter_map (|w| WindowLabel::derive (&w.title, &rules) .name() .map (|n| OrderEntry::new (n, w.order)))
            .collect::<Vec<_>>();
        if entries.is_empty() { return Ok(false) }

        let key = match set_key {
            Some(k) => k.to_string(),
            None    => self.store.compute_key (&Fingerprint::from_names (entries.iter().map(|e| &e.name))) .unwrap_or_default(),
        };
        let res = self.store.save (&key, entries);
        // the store holds the new entries under this key whether or not the write-back went through
        snap.set_key = Some(key);
        res
    }



    /*****  read-only views for the rendering side  ******/

    pub fn subscribe_to_change (&self) -> Subscription { self.changes.subscribe() }
    pub fn changes (&self) -> &Notifier { &self.changes }

    pub fn sorted_handles (&self) -> Vec<Hwnd> {
        self.lock_state().sorted.clone()
    }

    pub fn is_tracked (&self, hwnd:Hwnd) -> bool {
        self.lock_state().windows.contains_key (&hwnd)
    }

    pub fn active_handle (&self) -> Option<Hwnd> {
        self.lock_state().active
    }

    /// Label of a tracked window ("..." for placeholders), None if the window isnt tracked
    pub fn label (&self, hwnd:Hwnd) -> Option<String> {
        let rules = self.label_rules();
        self.lock_state().windows.get(&hwnd) .map (|w| WindowLabel::derive (&w.title, &rules).to_string())
    }

    /// The set name the current windows resolved to, empty if this set was never saved
    pub fn current_set_key (&self) -> String {
        self.lock_state().set_key.clone().unwrap_or_default()
    }

    pub fn snapshot (&self) -> Snapshot {
        self.lock_state().clone()
    }

    /// Whether the OS now reports a different title for a tracked window than we last saw
    pub fn title_is_stale (&self, hwnd:Hwnd) -> bool {
        let cached = self.lock_state().windows.get(&hwnd) .map (|w| w.cached_title.clone());
        let Some(cached) = cached else { return false };
        self.source.window_title(hwnd) .is_some_and (|t| t != cached)
    }

    pub fn render_list (&self) -> RenderList_Pl {
        let rules = self.label_rules();
        let snap = self.lock_state();
        let rows = snap.sorted .iter() .filter_map (|h| snap.windows.get(h)) .map (|w| RenderRow {
            hwnd   : w.hwnd,
            label  : WindowLabel::derive (&w.title, &rules).to_string(),
            order  : w.order,
            active : snap.active == Some(w.hwnd),
        } ) .collect();
        RenderList_Pl { rows, set_key: snap.set_key.clone().unwrap_or_default() }
    }

    pub fn render_payload (&self) -> String {
        serde_json::to_string (&self.render_list()) .unwrap_or_else (|e| {
            warn! ("render-list serialization failed: {:?}", e);
            String::new()
        } )
    }

}
