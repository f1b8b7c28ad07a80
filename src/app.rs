//! Wires the engine, scanner, hotkey listener and config watcher together, and owns their lifetimes.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;
use std::thread::{spawn, JoinHandle};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{Engine, EngineSettings};
use crate::error::Result;
use crate::hotkeys::{HotkeyBackend, HotkeyListener};
use crate::ordering::OrderingStore;
use crate::scanner::Scanner;
use crate::window::{WindowEvent, WindowSource};



# [ atomic_enum::atomic_enum ]
# [ derive (PartialEq) ]
pub enum AppState { Running, Stopping, Stopped }
// ^^ the atomic_enum crate generates an AtomicAppState for us


/// The OS-facing collaborators the app runs against
pub struct Platform {
    pub source        : Arc <dyn WindowSource>,
    pub hotkeys       : Option <Arc <dyn HotkeyBackend>>,
    pub window_events : Option <Receiver <WindowEvent>>,
}


pub struct _App {
    engine   : Engine,
    conf     : Config,
    scanner  : Scanner,
    hotkeys  : Option <HotkeyListener>,
    state    : AtomicAppState,
    stop_tx  : Mutex <Option <Sender<()>>>,
    done_rx  : Receiver<()>,
    done_tx  : Mutex <Option <Sender<()>>>,
    workers  : Mutex <Vec <JoinHandle<()>>>,
}

# [ derive (Clone) ]
pub struct App ( Arc <_App> );

impl Deref for App {
    type Target = _App;
    fn deref (&self) -> &_App { &self.0 }
}




impl App {

    pub fn start (conf:Config, platform:Platform) -> Result<App> {
        let store  = OrderingStore::new (Arc::new (conf.clone()));
        let engine = Engine::new (platform.source, store, EngineSettings::from_config (&conf));

        let scanner = Scanner::start (engine.clone(), conf.get_scan_interval());

        let hotkeys = match platform.hotkeys .map (|hk| HotkeyListener::start (engine.clone(), conf.clone(), hk)) .transpose() {
            Ok(hl) => hl,
            Err(e) => { scanner.stop(); return Err(e) }
        };

        if let Err(e) = conf.watch() {
            warn! ("config changes wont be picked up until restart: {}", e);
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        let mut workers = Vec::new();

        // config changes: settings, saved orderings, scan interval and log level all get re-applied
        let conf_sub = conf.subscribe_to_change();
        let (c, e, s, srx) = (conf.clone(), engine.clone(), scanner.clone(), stop_rx.clone());
        workers.push ( spawn ( move || {
            loop { select! {
                recv(srx) -> _ => break,
                recv(conf_sub.receiver()) -> msg => {
                    if msg.is_err() { break }
                    Self::apply_config (&c, &e, &s);
                },
            } }
            c.changes().unsubscribe (conf_sub.id());
        } ) );

        // OS window notifications just pull the next scan forward
        let events = platform.window_events.unwrap_or_else (never);
        let (e, s, srx) = (engine.clone(), scanner.clone(), stop_rx);
        workers.push ( spawn ( move || {
            loop { select! {
                recv(srx) -> _ => break,
                recv(events) -> ev => match ev {
                    Ok(ev) => Self::route_window_event (&e, &s, ev),
                    Err(_) => break,
                },
            } }
        } ) );

        info! ("winset started with config at {:?}", conf.path());
        Ok ( App ( Arc::new ( _App {
            engine, conf, scanner, hotkeys,
            state   : AtomicAppState::new (AppState::Running),
            stop_tx : Mutex::new (Some(stop_tx)),
            done_rx,
            done_tx : Mutex::new (Some(done_tx)),
            workers : Mutex::new (workers),
        } ) ) )
    }

    fn apply_config (conf:&Config, engine:&Engine, scanner:&Scanner) {
        debug! ("applying config change");
        engine.update_settings (EngineSettings::from_config (conf));
        engine.store().reload();
        engine.restore_order();
        scanner.set_interval (conf.get_scan_interval());
        conf.reload_log_level();
        // a changed process filter or label rules only show up on a fresh enumeration
        scanner.wake();
    }

    pub fn route_window_event (engine:&Engine, scanner:&Scanner, ev:WindowEvent) {
        match ev {
            // title-change events come in floods, most of them with the same title
            WindowEvent::TitleChanged (h)  => if engine.title_is_stale (h) { scanner.wake() },
            WindowEvent::Hidden (h) | WindowEvent::Destroyed (h) => if engine.is_tracked (h) { scanner.wake() },
            WindowEvent::Shown (_) => scanner.wake(),
        }
    }


    pub fn engine  (&self) -> &Engine  { &self.engine }
    pub fn config  (&self) -> &Config  { &self.conf }
    pub fn scanner (&self) -> &Scanner { &self.scanner }
    pub fn hotkeys (&self) -> Option<&HotkeyListener> { self.hotkeys.as_ref() }

    pub fn state (&self) -> AppState { self.state.load (Ordering::SeqCst) }

    /// Blocks until the app has been stopped (from another thread)
    pub fn wait (&self) {
        let _ = self.done_rx.recv();
    }

    /// Stops every task and waits for them to finish. Only the first call does anything.
    pub fn stop (&self) {
        if self.state.compare_exchange (AppState::Running, AppState::Stopping, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return
        }
        info! ("winset stopping");
        self.stop_tx.lock().unwrap().take();
        // ^^ dropping the sender disconnects the stop channel, which every worker selects on
        self.conf.unwatch();
        self.workers.lock().unwrap() .drain(..) .for_each (|w| { let _ = w.join(); });
        if let Some(hl) = self.hotkeys.as_ref() { hl.stop() }
        self.scanner.stop();
        self.state.store (AppState::Stopped, Ordering::SeqCst);
        self.done_tx.lock().unwrap().take();
        info! ("winset stopped");
    }

}




#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkeys::HotkeyAction;
    use crate::testing::{FakeHotkeys, FakeSource};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::{Duration, Instant};
    use crossbeam_channel::unbounded;

    fn wait_until (f: impl Fn() -> bool) -> bool {
        let t = Instant::now();
        while t.elapsed() < Duration::from_secs(5) {
            if f() { return true }
            std::thread::sleep (Duration::from_millis(10));
        }
        false
    }

    const SLOW_SCAN : &str = "scan_interval_ms = 60000\nlogging_enabled = false\n[keys]\nprevious = \"F1\"\nnext = \"F2\"\n";

    struct Rig {
        _dir    : tempfile::TempDir,
        app     : App,
        source  : Arc<FakeSource>,
        hotkeys : Arc<FakeHotkeys>,
        events  : Sender<WindowEvent>,
    }

    fn rig (conf_text:&str, wins:&[(isize, &str)]) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join (Config::CONF_FILE_NAME);
        fs::write (&path, conf_text).unwrap();
        let source = Arc::new (FakeSource::default());
        source.set (wins);
        let hotkeys = Arc::new (FakeHotkeys::default());
        let (events, rx) = unbounded();
        let platform = Platform { source: source.clone(), hotkeys: Some(hotkeys.clone()), window_events: Some(rx) };
        let app = App::start (Config::at (path), platform).unwrap();
        Rig { _dir: dir, app, source, hotkeys, events }
    }

    #[test]
    fn start_scans_and_registers_hotkeys() {
        let r = rig (SLOW_SCAN, &[(1, "a - x"), (2, "b - x")]);
        assert!(wait_until (|| r.app.engine().sorted_handles() == vec![1, 2]));
        assert_eq!(r.hotkeys.registered_keys(), vec!["F1", "F2"]);
        r.hotkeys.press (HotkeyAction::Next);
        assert!(wait_until (|| r.app.engine().active_handle() == Some(2)));
        r.app.stop();
    }

    #[test]
    fn window_events_pull_the_next_scan_forward() {
        let r = rig (SLOW_SCAN, &[(1, "a - x")]);
        assert!(wait_until (|| r.app.engine().sorted_handles() == vec![1]));
        r.source.set (&[(1, "a - x"), (2, "b - x")]);
        r.events.send (WindowEvent::Shown (2)).unwrap();
        assert!(wait_until (|| r.app.engine().sorted_handles() == vec![1, 2]));

        // an untracked window going away doesnt cost a scan
        std::thread::sleep (Duration::from_millis(50));
        let before = r.app.scanner().passes();
        r.events.send (WindowEvent::Destroyed (77)).unwrap();
        std::thread::sleep (Duration::from_millis(100));
        assert_eq!(r.app.scanner().passes(), before);
        r.app.stop();
    }

    #[test]
    fn config_edits_are_applied_live() {
        let r = rig (SLOW_SCAN, &[(1, "a - x"), (2, "b - x")]);
        assert!(wait_until (|| r.app.engine().sorted_handles() == vec![1, 2]));

        let edited = concat!(
            "scan_interval_ms = 60000\n",
            "logging_enabled = false\n",
            "process_filter = \"Other.exe\"\n",
            "[keys]\nprevious = \"F1\"\nnext = \"F2\"\n",
            "[windows]\nedited = [ { name = \"a\", order = 1 }, { name = \"b\", order = 0 } ]\n",
        );
        fs::write (r.app.config().path(), edited).unwrap();
        // the watcher would get there too, this just doesnt wait for it
        let _ = r.app.config().reload();

        assert!(wait_until (|| r.app.engine().sorted_handles() == vec![2, 1]));
        assert_eq!(r.app.engine().current_set_key(), "edited");
        assert_eq!(r.app.engine().settings().process_filter, "Other.exe");
        r.app.stop();
    }

    #[test]
    fn stop_is_idempotent_and_releases_everything() {
        let r = rig (SLOW_SCAN, &[(1, "a - x")]);
        let app = r.app.clone();
        let waiter = std::thread::spawn (move || app.wait());
        r.app.stop();
        r.app.stop();
        waiter.join().unwrap();
        assert_eq!(r.app.state(), AppState::Stopped);
        assert!(!r.app.scanner().is_running());
        assert!(r.hotkeys.registered_keys().is_empty());
    }

    #[test]
    fn bad_key_bindings_fail_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join (Config::CONF_FILE_NAME);
        fs::write (&path, "[keys]\nprevious = \"F1\"\nnext = \"F1\"\n").unwrap();
        let platform = Platform {
            source        : Arc::new (FakeSource::default()),
            hotkeys       : Some (Arc::new (FakeHotkeys::default())),
            window_events : None,
        };
        assert!(App::start (Config::at (path), platform).is_err());
    }
}
