/*! Error types for winset operations. */

use std::path::PathBuf;

use notify_debouncer_mini::notify;

use crate::hotkeys::HotkeyAction;


/// Errors from reading or interpreting the configuration file.
# [ derive (Debug, thiserror::Error) ]
pub enum ConfigError {
    #[error("no key binding configured for '{0}'")]
    MissingKeyBinding (HotkeyAction),

    #[error("malformed key binding '{descriptor}' for '{action}': {reason}")]
    MalformedKeyBinding { action: HotkeyAction, descriptor: String, reason: String },

    #[error("key binding '{descriptor}' is already used by '{bound_to}'")]
    DuplicateKeyBinding { descriptor: String, bound_to: HotkeyAction },

    #[error("config file {path} could not be parsed: {source}")]
    Parse { path: PathBuf, #[source] source: toml_edit::TomlError },

    #[error("config file {path} could not be read: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("no writeable location found for the config file")]
    NoLocation,
}


/// Errors from registering global hotkeys with the OS.
# [ derive (Debug, thiserror::Error) ]
pub enum HotkeyError {
    #[error("unsupported key name '{0}'")]
    UnknownKey (String),

    #[error("the OS refused to register '{descriptor}': {reason}")]
    Refused { descriptor: String, reason: String },

    #[error("hotkey backend is no longer running")]
    BackendGone,
}


/// Crate level error.
# [ derive (Debug, thiserror::Error) ]
pub enum Error {
    #[error(transparent)]
    Config (#[from] ConfigError),

    #[error(transparent)]
    Hotkey (#[from] HotkeyError),

    #[error("failed to write window orderings to {path}: {source}")]
    Persist { path: PathBuf, #[source] source: std::io::Error },

    #[error("a window set needs a non-empty name to be saved")]
    EmptySetKey,

    #[error("config file watcher failed: {0}")]
    Watch (#[from] notify::Error),
}


pub type Result<T> = std::result::Result<T, Error>;
