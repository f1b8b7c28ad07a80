//! Global hotkeys for focus cycling: key descriptors, the OS backend seam, and the listener task
//! that dispatches presses and re-registers bindings when the config changes.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::thread::{spawn, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ConfigError, HotkeyError, Result};
use crate::signals::Flag;



/// The logical actions a hotkey can be bound to
# [ derive (Debug, Eq, PartialEq, Hash, Copy, Clone, AsRefStr, Display, Serialize, Deserialize) ]
# [ strum (serialize_all = "snake_case") ]
# [ serde (rename_all = "snake_case") ]
pub enum HotkeyAction {
    Previous,
    Next,
}

impl HotkeyAction {
    pub const ALL : [HotkeyAction; 2] = [HotkeyAction::Previous, HotkeyAction::Next];

    pub fn str (&self) -> &str { self.as_ref() }
}



/// A parsed key descriptor such as `Ctrl+Alt+F1`.
/// The key name is kept upper-cased, backends map it to their own key codes.
# [ derive (Debug, Default, Eq, PartialEq, Hash, Clone) ]
pub struct KeyChord {
    pub ctrl  : bool,
    pub alt   : bool,
    pub shift : bool,
    pub win   : bool,
    pub key   : String,
}

impl KeyChord {

    /// Parses a `+`-separated chain of modifiers ending in a key name. Returns the reason on failure.
    pub fn parse (descriptor:&str) -> std::result::Result<KeyChord, String> {
        let parts = descriptor .split ('+') .map (|p| p.trim()) .collect::<Vec<_>>();
        let Some ((key, mods)) = parts.split_last() else { return Err ("empty descriptor".into()) };
        if key.is_empty() { return Err ("missing key name".into()) }

        let mut chord = KeyChord { key: key.to_uppercase(), ..KeyChord::default() };
        for m in mods {
            let slot = match m.to_lowercase().as_str() {
                "ctrl" | "control"          => &mut chord.ctrl,
                "alt"                       => &mut chord.alt,
                "shift"                     => &mut chord.shift,
                "win" | "super" | "meta"    => &mut chord.win,
                ""                          => return Err ("empty modifier".into()),
                other                       => return Err (format! ("unknown modifier '{}'", other)),
            };
            if *slot { return Err (format! ("modifier '{}' repeated", m)) }
            *slot = true;
        }
        Ok(chord)
    }

}

impl fmt::Display for KeyChord {
    fn fmt (&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl  { f.write_str ("Ctrl+")?  }
        if self.alt   { f.write_str ("Alt+")?   }
        if self.shift { f.write_str ("Shift+")? }
        if self.win   { f.write_str ("Win+")?   }
        f.write_str (&self.key)
    }
}


pub type KeyBindings = Vec <(HotkeyAction, KeyChord)>;



/// The OS-side collaborator that owns the actual global hotkey registrations
pub trait HotkeyBackend : Send + Sync + 'static {
    /// Replaces any current registrations with these bindings
    fn register_all (&self, bindings:&[(HotkeyAction, KeyChord)]) -> std::result::Result<(), HotkeyError>;

    fn unregister_all (&self);

    /// Stream of presses of registered hotkeys. Disconnects when the backend shuts down.
    fn presses (&self) -> Receiver<HotkeyAction>;
}



# [ derive ( ) ]
pub struct _HotkeyListener {
    engine  : Engine,
    conf    : Config,
    backend : Arc <dyn HotkeyBackend>,
    current : Mutex <KeyBindings>,
    paused  : Flag,
    stop_tx : Sender<()>,
    worker  : Mutex <Option <JoinHandle<()>>>,
}

# [ derive (Clone) ]
pub struct HotkeyListener ( Arc <_HotkeyListener> );

impl Deref for HotkeyListener {
    type Target = _HotkeyListener;
    fn deref (&self) -> &_HotkeyListener { &self.0 }
}



impl HotkeyListener {

    /// Registers the configured bindings and starts dispatching presses to the engine.
    /// Bad bindings at startup are an error, later ones are logged and retried on the next config change.
    pub fn start (engine:Engine, conf:Config, backend:Arc<dyn HotkeyBackend>) -> Result<HotkeyListener> {
        let bindings = conf.key_bindings()?;
        backend.register_all (&bindings)?;
        info! ("hotkeys registered: {}", Self::describe(&bindings));

        let (stop_tx, stop_rx) = bounded (1);
        let hl = HotkeyListener ( Arc::new ( _HotkeyListener {
            engine, conf, backend,
            current : Mutex::new (bindings),
            paused  : Flag::default(),
            stop_tx,
            worker  : Mutex::new (None),
        } ) );

        let presses = hl.backend.presses();
        let conf_sub = hl.conf.subscribe_to_change();
        let hlc = hl.clone();
        let worker = spawn ( move || {
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(presses) -> press => match press {
                        Ok(action) => hlc.dispatch (action),
                        Err(_)     => { warn! ("hotkey backend went away, listener exiting"); break }
                    },
                    recv(conf_sub.receiver()) -> msg => match msg {
                        Ok(())  => hlc.refresh(),
                        Err(_)  => break,
                    },
                }
            }
            hlc.conf.changes().unsubscribe (conf_sub.id());
            debug! ("hotkey listener stopped");
        } );
        *hl.worker.lock().unwrap() = Some(worker);
        Ok(hl)
    }

    fn describe (bindings:&[(HotkeyAction, KeyChord)]) -> String {
        bindings .iter() .map (|(a,c)| format! ("{}={}", a, c)) .collect::<Vec<_>>() .join (", ")
    }

    fn dispatch (&self, action:HotkeyAction) {
        if self.paused.is_set() { return }
        debug! ("hotkey: {}", action);
        match action {
            HotkeyAction::Previous => { self.engine.focus_prev(); }
            HotkeyAction::Next     => { self.engine.focus_next(); }
        }
    }

    /// Re-reads bindings from the config and re-registers them if they changed
    pub fn refresh (&self) {
        let bindings = match self.conf.key_bindings() {
            Ok(b)  => b,
            Err(e) => { error! ("keeping previous hotkeys: {}", e); return }
        };
        let mut current = self.current.lock().unwrap();
        if *current == bindings { return }
        if self.paused.is_clear() {
            if let Err(e) = self.register (&bindings) {
                error! ("hotkey re-registration failed: {}", e);
                // the old set was dropped by the failed attempt, so try to put it back
                if let Err(e) = self.register (&current) {
                    error! ("could not restore previous hotkeys either, none are registered: {}", e);
                    current.clear();
                    // ^^ an empty set never equals configured bindings, so the next config change always retries
                }
                return
            }
        }
        *current = bindings;
    }

    fn register (&self, bindings:&[(HotkeyAction, KeyChord)]) -> std::result::Result<(), HotkeyError> {
        self.backend.unregister_all();
        self.backend.register_all (bindings)?;
        info! ("hotkeys registered: {}", Self::describe(bindings));
        Ok(())
    }

    /// Drops the OS registrations (e.g. while a new key is being captured), presses are ignored until resumed
    pub fn pause (&self) {
        if self.paused.test_and_set() { return }
        self.backend.unregister_all();
        info! ("hotkeys paused");
    }

    pub fn resume (&self) -> Result<()> {
        if self.paused.is_clear() { return Ok(()) }
        let bindings = self.conf.key_bindings() .unwrap_or_else (|e: ConfigError| {
            warn! ("resuming with previous hotkeys: {}", e);
            self.current.lock().unwrap().clone()
        } );
        self.register (&bindings)?;
        *self.current.lock().unwrap() = bindings;
        self.paused.clear();
        info! ("hotkeys resumed");
        Ok(())
    }

    pub fn is_paused (&self) -> bool { self.paused.is_set() }

    pub fn bindings (&self) -> KeyBindings { self.current.lock().unwrap().clone() }

    pub fn stop (&self) {
        let _ = self.stop_tx.try_send (());
        if let Some(w) = self.worker.lock().unwrap().take() { let _ = w.join(); }
        self.backend.unregister_all();
    }

}
