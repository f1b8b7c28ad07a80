//! Fakes for the OS and settings collaborators, shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::engine::{Engine, EngineSettings};
use crate::error::{Error, HotkeyError, Result};
use crate::hotkeys::{HotkeyAction, HotkeyBackend, KeyChord};
use crate::ordering::{OrderEntry, OrderingCodec, OrderingStore, OrderingTable};
use crate::window::{Hwnd, RawWindow, WindowSource};



/// Scripted window source: serves whatever window list was last set, records raised windows
#[derive(Default)]
pub(crate) struct FakeSource {
    pub windows : Mutex<Vec<RawWindow>>,
    pub raised  : Mutex<Vec<Hwnd>>,
    pub lists   : AtomicUsize,
    pub refuse  : AtomicBool,
}

impl FakeSource {
    pub fn set (&self, wins:&[(Hwnd, &str)]) {
        *self.windows.lock().unwrap() = wins.iter() .map (|(h,t)| RawWindow::new (*h, 100, t)) .collect();
    }
    pub fn raised (&self) -> Vec<Hwnd> { self.raised.lock().unwrap().clone() }
}

impl WindowSource for FakeSource {
    fn list_windows (&self, _process_filter:&str) -> Vec<RawWindow> {
        self.lists.fetch_add (1, Ordering::SeqCst);
        self.windows.lock().unwrap().clone()
    }
    fn window_title (&self, hwnd:Hwnd) -> Option<String> {
        self.windows.lock().unwrap() .iter() .find (|w| w.hwnd == hwnd) .map (|w| w.title.clone())
    }
    fn bring_to_front (&self, hwnd:Hwnd) -> bool {
        self.raised.lock().unwrap().push (hwnd);
        !self.refuse.load (Ordering::SeqCst)
    }
}



/// In-memory ordering codec, can be told to fail writes
#[derive(Default)]
pub(crate) struct MemCodec {
    pub table  : Mutex<OrderingTable>,
    pub fail   : AtomicBool,
    pub writes : AtomicUsize,
}

impl MemCodec {
    pub fn with_set (key:&str, entries:&[(&str, usize)]) -> MemCodec {
        let codec = MemCodec::default();
        codec.table.lock().unwrap() .insert (
            key.to_string(), entries.iter() .map (|(n,o)| OrderEntry::new (n, *o)) .collect()
        );
        codec
    }
    pub fn set (&self, key:&str) -> Option<Vec<OrderEntry>> {
        self.table.lock().unwrap() .get(key) .cloned()
    }
}

impl OrderingCodec for MemCodec {
    fn load_orderings (&self) -> OrderingTable { self.table.lock().unwrap().clone() }
    fn save_orderings (&self, table:&OrderingTable) -> Result<()> {
        if self.fail.load (Ordering::SeqCst) {
            return Err (Error::Persist {
                path   : "mem".into(),
                source : std::io::Error::new (std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
        self.writes.fetch_add (1, Ordering::SeqCst);
        *self.table.lock().unwrap() = table.clone();
        Ok(())
    }
}



/// Hotkey backend that records registrations and lets tests inject presses
pub(crate) struct FakeHotkeys {
    pub registered : Mutex<Vec<(HotkeyAction, KeyChord)>>,
    pub rounds     : AtomicUsize,
    pub reject     : Mutex<Option<String>>,
    press_tx       : Sender<HotkeyAction>,
    press_rx       : Receiver<HotkeyAction>,
}

impl Default for FakeHotkeys {
    fn default () -> Self {
        let (press_tx, press_rx) = unbounded();
        FakeHotkeys {
            registered : Mutex::new (Vec::new()),
            rounds     : AtomicUsize::new (0),
            reject     : Mutex::new (None),
            press_tx, press_rx,
        }
    }
}

impl FakeHotkeys {
    pub fn press (&self, action:HotkeyAction) { let _ = self.press_tx.send (action); }
    pub fn registered_keys (&self) -> Vec<String> {
        self.registered.lock().unwrap() .iter() .map (|(_,c)| c.to_string()) .collect()
    }
}

impl HotkeyBackend for FakeHotkeys {
    fn register_all (&self, bindings:&[(HotkeyAction, KeyChord)]) -> std::result::Result<(), HotkeyError> {
        self.rounds.fetch_add (1, Ordering::SeqCst);
        if let Some(key) = self.reject.lock().unwrap().clone() {
            if bindings.iter().any (|(_,c)| c.key == key) { return Err (HotkeyError::UnknownKey (key)) }
        }
        *self.registered.lock().unwrap() = bindings.to_vec();
        Ok(())
    }
    fn unregister_all (&self) {
        self.registered.lock().unwrap().clear();
    }
    fn presses (&self) -> Receiver<HotkeyAction> { self.press_rx.clone() }
}



pub(crate) fn engine_with (codec:MemCodec) -> (Engine, Arc<FakeSource>, Arc<MemCodec>) {
    let source = Arc::new (FakeSource::default());
    let codec = Arc::new (codec);
    let store = OrderingStore::new (codec.clone());
    let engine = Engine::new (source.clone(), store, EngineSettings::default());
    (engine, source, codec)
}
