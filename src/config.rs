#![ allow (non_snake_case) ]

use std::fs;
use std::ops::{Deref, Not};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use toml_edit::{Array, DocumentMut, InlineTable, Item, Table};

use tracing::{debug, error, info, warn};
use tracing::metadata::LevelFilter;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{Layer, Registry, reload};
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::prelude::*;

use crate::error::{ConfigError, Error, Result};
use crate::hotkeys::{HotkeyAction, KeyBindings, KeyChord};
use crate::ordering::{OrderEntry, OrderingCodec, OrderingTable};
use crate::signals::{Notifier, Subscription};



pub struct _Config {
    path     : PathBuf,
    toml     : RwLock <DocumentMut>,
    default  : DocumentMut,
    loglevel : RwLock <Option <Handle <LevelFilter, Registry>>>,
    changes  : Notifier,
    watcher  : Mutex <Option <Debouncer <RecommendedWatcher>>>,
}

# [ derive (Clone) ]
pub struct Config ( Arc <_Config> );

impl Deref for Config {
    type Target = _Config;
    fn deref (&self) -> &_Config { &self.0 }
}

impl std::fmt::Debug for Config {
    fn fmt (&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config") .field ("path", &self.path) .finish_non_exhaustive()
    }
}




/// Returns the directory of the currently running executable
fn get_app_dir () -> Option<PathBuf> {
    std::env::current_exe().ok() .and_then (|p| p.parent() .map (|p| p.to_path_buf()))
}

/// Checks whether a path is writeable by the current user by attempting to open/create a file in write mode
fn is_writeable (path: &Path) -> bool {
    fs::OpenOptions::new().write(true).create(true).truncate(false).open(path).is_ok()
    // note that ^^ this is similar to 'touch' and will create an empty file if it doesnt exist
}




impl Config {

    pub const CONF_FILE_NAME : &'static str = "winset.conf.toml";
    pub const DEFAULT_TOML   : &'static str = include_str!("../winset.conf.toml");
    // ^^ the bundled default sits at the project root, include_str pulls it in at compile time

    pub const WATCH_DEBOUNCE : Duration = Duration::from_millis (300);


    /// Config file next to the exe if we can write there, else in the user config dir
    pub fn default_location () -> Option<PathBuf> {
        let app_dir_loc = get_app_dir() .map (|p| p.join (Self::CONF_FILE_NAME));
        if app_dir_loc.as_ref() .is_some_and (|p| is_writeable(p)) {
            return app_dir_loc
        }
        let data_dir = dirs::config_dir() .map (|p| p.join ("winset"));
        if let Some(d) = data_dir.as_ref() .filter (|d| !d.exists()) {
            let _ = fs::create_dir_all (d);
        }
        let data_dir_loc = data_dir .map (|p| p.join (Self::CONF_FILE_NAME));
        if data_dir_loc.as_ref() .is_some_and (|p| is_writeable(p)) {
            return data_dir_loc
        }
        None
    }

    pub fn locate () -> Result<Config> {
        let path = Self::default_location() .ok_or (ConfigError::NoLocation)?;
        Ok ( Config::at (path) )
    }

    /// Loads the config at this path (writing the defaults there if its missing or empty)
    pub fn at (path:PathBuf) -> Config {
        let default = DocumentMut::from_str (Self::DEFAULT_TOML) .unwrap_or_default();
        let conf = Config ( Arc::new ( _Config {
            path,
            toml     : RwLock::new (default.clone()),
            default,
            loglevel : RwLock::new (None),
            changes  : Notifier::new ("config"),
            watcher  : Mutex::new (None),
        } ) );
        conf.load();
        conf
    }

    pub fn path (&self) -> &Path { &self.path }

    pub fn get_log_loc (&self) -> Option<PathBuf> {
        self.path.parent() .map (|p| p.to_path_buf())
    }



    /*****  loading, reloading and write-back  ******/

    fn load (&self) {
        match fs::read_to_string (&self.path) {
            Ok(cfg_str) if !cfg_str.trim().is_empty() => {
                match DocumentMut::from_str (&cfg_str) {
                    Ok(toml) => { *self.toml.write().unwrap() = toml; }
                    Err(e)   => {
                        // we leave the users file alone so they can fix it, and run on defaults meanwhile
                        error! ("config file {:?} could not be parsed, using defaults: {}", &self.path, e);
                        *self.toml.write().unwrap() = self.default.clone();
                    }
                }
            }
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                error! ("config file {:?} could not be read, using defaults: {}", &self.path, e);
                *self.toml.write().unwrap() = self.default.clone();
            }
            _ => {
                // missing or empty .. we'll populate it with the defaults
                info! ("writing default config to {:?}", &self.path);
                self.reset_to_default();
            }
        }
    }

    pub fn reset_to_default (&self) {
        *self.toml.write().unwrap() = self.default.clone();
        if let Err(e) = self.write_back_toml() { error! ("{}", e) }
    }

    /// Re-reads the file, replacing the in-memory document entirely if the contents differ.
    /// Returns whether anything changed. A malformed file leaves the current document in place.
    pub fn reload (&self) -> std::result::Result<bool, ConfigError> {
        let cfg_str = fs::read_to_string (&self.path)
            .map_err (|source| ConfigError::Read { path: self.path.clone(), source })?;
        // editors often truncate before writing, the write itself will come through as another event
        if cfg_str.trim().is_empty() { return Ok(false) }

        let toml = DocumentMut::from_str (&cfg_str)
            .map_err (|source| ConfigError::Parse { path: self.path.clone(), source })?;
        {
            let mut cur = self.toml.write().unwrap();
            if cur.to_string() == cfg_str { return Ok(false) }
            *cur = toml;
        }
        info! ("config reloaded from {:?}", &self.path);
        self.changes.notify();
        Ok(true)
    }

    fn write_back_toml (&self) -> Result<()> {
        let toml_str = self.toml.read().unwrap().to_string();
        fs::write (&self.path, toml_str) .map_err (|source| Error::Persist { path: self.path.clone(), source })
    }

    pub fn subscribe_to_change (&self) -> Subscription { self.changes.subscribe() }
    pub fn changes (&self) -> &Notifier { &self.changes }



    /*****  watching the file for outside edits  ******/

    /// Starts watching the config file, reloading and publishing a change whenever its contents differ
    pub fn watch (&self) -> Result<()> {
        let dir = self.path.parent() .map (|p| p.to_path_buf()) .ok_or (ConfigError::NoLocation)?;
        let file_name = self.path.file_name() .map (|f| f.to_os_string());
        let conf_w : Weak<_Config> = Arc::downgrade (&self.0);

        let mut debouncer = new_debouncer ( Self::WATCH_DEBOUNCE, move |res: DebounceEventResult| {
            let Some(conf) = conf_w.upgrade() .map (Config) else { return };
            match res {
                Ok(events) => {
                    if events .iter() .any (|e| e.path.file_name() == file_name.as_deref()) {
                        match conf.reload() {
                            Ok(true)  => { }
                            Ok(false) => debug! ("config file touched without content changes"),
                            Err(e)    => error! ("config reload failed, keeping previous config: {}", e),
                        }
                    }
                }
                Err(e) => warn! ("config watcher error: {:?}", e),
            }
        } )?;
        // the directory is watched rather than the file so editors that replace-on-save are still seen
        debouncer.watcher().watch (&dir, RecursiveMode::NonRecursive)?;
        *self.watcher.lock().unwrap() = Some(debouncer);
        info! ("watching {:?} for config changes", &self.path);
        Ok(())
    }

    pub fn unwatch (&self) {
        if self.watcher.lock().unwrap().take().is_some() {
            debug! ("config watcher stopped");
        }
    }



    /*****  logging setup  ******/

    pub fn reload_log_level (&self) {
        // in case logging went from disabled to enabled (the initial setup call from main keeps the flush guard)
        let _ = self.setup_log_subscriber();
        let log_level = self.get_log_level();
        warn! ("Setting log-level to {:?}", log_level.into_level());
        self.loglevel.read().unwrap().as_ref() .map (|h| {
            h.modify (|f| *f = log_level)
        } );
    }

    pub fn setup_log_subscriber (&self) -> Option<WorkerGuard> {
        if self.check_flag__logging_enabled().not() || self.loglevel.read().unwrap().is_some() {
            return None
        }
        let log_loc = self.get_log_loc()?;

        let log_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("winset_log")
            .filename_suffix("log")
            .max_log_files(7)
            .build(log_loc)
            .ok()?;

        let (nb_log_appender, guard) = non_blocking (log_appender);

        let (level_filter, filter_handle) = reload::Layer::new (self.get_log_level());

        *self.loglevel.write().unwrap() = Some(filter_handle);

        let timer = LocalTime::new ( ::time::format_description::parse (
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ).ok()? );

        let subscriber = tracing_subscriber::fmt::Layer::new()
            .with_writer(nb_log_appender)
            .with_timer(timer)
            .with_ansi(false)
            .with_filter(level_filter);

        tracing_subscriber::registry().with(subscriber).try_init().ok()?;

        Some(guard)
    }



    /*****  plain settings, each falling back to the bundled default  ******/

    fn get_item <T> (&self, key:&str, f: impl Fn(&Item) -> Option<T>) -> Option<T> {
        self.toml.read().unwrap() .get(key) .and_then (&f)
            .or_else (|| self.default.get(key) .and_then (&f))
    }

    fn check_flag (&self, key:&str) -> bool {
        self.get_item (key, |i| i.as_bool()) .unwrap_or_default()
    }

    fn get_number (&self, key:&str) -> i64 {
        self.get_item (key, |i| i.as_integer()) .unwrap_or_default()
    }

    fn get_string (&self, key:&str) -> String {
        self.get_item (key, |i| i.as_str().map (|s| s.to_string())) .unwrap_or_default()
    }


    pub fn check_flag__logging_enabled (&self) -> bool { self.check_flag ("logging_enabled") }

    pub fn get_process_filter     (&self) -> String { self.get_string ("process_filter") }
    pub fn get_label_delimiter    (&self) -> String { self.get_string ("label_delimiter") }
    pub fn get_placeholder_marker (&self) -> String { self.get_string ("placeholder_marker") }

    pub fn get_scan_interval (&self) -> Duration {
        Duration::from_millis (self.get_number ("scan_interval_ms") .max(0) as u64)
    }

    pub fn get_log_level (&self) -> LevelFilter {
        if !self.check_flag__logging_enabled() {
            return LevelFilter::OFF;
        }
        match self.get_string("logging_level").to_uppercase().as_str() {
            "TRACE" => LevelFilter::TRACE,
            "DEBUG" => LevelFilter::DEBUG,
            "WARN"  => LevelFilter::WARN,
            "ERROR" => LevelFilter::ERROR,
            "OFF"   => LevelFilter::OFF,
            _       => LevelFilter::INFO,
        }
    }



    /*****  hotkey bindings  ******/

    fn key_descriptor (toml:&DocumentMut, action:HotkeyAction) -> Option<String> {
        toml .get("keys") .and_then (|k| k.get (action.str())) .and_then (|v| v.as_str())
            .map (|s| s.trim().to_string()) .filter (|s| !s.is_empty())
    }

    /// The configured binding for every action. Every action must be bound, to distinct keys.
    pub fn key_bindings (&self) -> std::result::Result<KeyBindings, ConfigError> {
        let toml = self.toml.read().unwrap();
        let mut bindings : KeyBindings = Vec::new();
        for action in HotkeyAction::ALL {
            let descriptor = Self::key_descriptor (&toml, action) .ok_or (ConfigError::MissingKeyBinding (action))?;
            let chord = KeyChord::parse (&descriptor)
                .map_err (|reason| ConfigError::MalformedKeyBinding { action, descriptor: descriptor.clone(), reason })?;
            if let Some((bound_to, _)) = bindings .iter() .find (|(_,c)| *c == chord) {
                return Err ( ConfigError::DuplicateKeyBinding { descriptor, bound_to: *bound_to } )
            }
            bindings.push ((action, chord));
        }
        Ok(bindings)
    }

    /// Rebinds an action and writes the file back. Refuses keys already bound to another action.
    pub fn set_key_binding (&self, action:HotkeyAction, descriptor:&str) -> Result<()> {
        let chord = KeyChord::parse (descriptor) .map_err (|reason| {
            ConfigError::MalformedKeyBinding { action, descriptor: descriptor.to_string(), reason }
        } )?;
        {
            let mut toml = self.toml.write().unwrap();
            let taken_by = HotkeyAction::ALL .into_iter() .filter (|a| *a != action) .find (|a| {
                Self::key_descriptor (&toml, *a) .and_then (|d| KeyChord::parse(&d).ok()) .as_ref() == Some(&chord)
            } );
            if let Some(bound_to) = taken_by {
                return Err ( ConfigError::DuplicateKeyBinding { descriptor: chord.to_string(), bound_to } .into() )
            }
            toml ["keys"] [action.str()] = toml_edit::value (chord.to_string());
        }
        self.write_back_toml()?;
        info! ("bound '{}' to {}", action, chord);
        self.changes.notify();
        Ok(())
    }



    /*****  the persisted window orderings  ******/

    fn parse_entries (key:&str, item:&Item) -> Vec<OrderEntry> {
        let entry = |name:Option<&str>, order:Option<i64>| match (name, order) {
            (Some(n), Some(o)) if o >= 0 => Some (OrderEntry::new (n, o as usize)),
            _ => { warn! ("skipping malformed ordering entry in window set '{}'", key); None }
        };
        if let Some(arr) = item.as_array() {
            arr .iter() .filter_map (|v| v.as_inline_table())
                .filter_map (|t| entry ( t.get("name").and_then(|v| v.as_str()), t.get("order").and_then(|v| v.as_integer()) ))
                .collect()
        } else if let Some(aot) = item.as_array_of_tables() {
            // hand-edited files might use [[windows."set"]] blocks instead
            aot .iter()
                .filter_map (|t| entry ( t.get("name").and_then(|i| i.as_str()), t.get("order").and_then(|i| i.as_integer()) ))
                .collect()
        } else {
            warn! ("window set '{}' is not a list of entries, ignoring it", key);
            Vec::new()
        }
    }

    fn entries_array (entries:&[OrderEntry]) -> Array {
        let mut arr = Array::new();
        for e in entries {
            let mut t = InlineTable::new();
            t.insert ("name",  e.name.as_str().into());
            t.insert ("order", (e.order as i64).into());
            arr.push (t);
        }
        arr .iter_mut() .for_each (|v| { v.decor_mut().set_prefix ("\n    "); });
        arr.set_trailing ("\n");
        arr.set_trailing_comma (true);
        arr
    }

}



impl OrderingCodec for Config {

    fn load_orderings (&self) -> OrderingTable {
        let toml = self.toml.read().unwrap();
        let Some(windows) = toml.get("windows") .and_then (|w| w.as_table_like()) else { return OrderingTable::new() };
        windows .iter() .map (|(key, item)| (key.to_string(), Self::parse_entries (key, item))) .collect()
    }

    fn save_orderings (&self, table:&OrderingTable) -> Result<()> {
        {
            let mut toml = self.toml.write().unwrap();
            let mut windows = Table::new();
            if let Some(old) = toml.get("windows") .and_then (|w| w.as_table()) {
                *windows.decor_mut() = old.decor().clone();
                if let Some(pos) = old.position() { windows.set_position (pos) }
            }
            for (key, entries) in table {
                windows.insert (key, toml_edit::value (Self::entries_array (entries)));
            }
            toml ["windows"] = Item::Table (windows);
        }
        self.write_back_toml()
    }

}
