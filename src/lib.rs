#![ allow (non_snake_case) ]

pub mod error;
pub mod signals;
pub mod window;
pub mod ordering;
pub mod engine;
pub mod reorder;
pub mod focus;
pub mod scanner;
pub mod hotkeys;
pub mod config;
pub mod app;

#[cfg(windows)]
pub mod win_apis;

#[cfg(test)]
pub(crate) mod testing;


pub use app::{App, AppState, Platform};
pub use config::Config;
pub use engine::{Engine, EngineSettings, WindowSetDiff};
pub use error::{ConfigError, Error, HotkeyError, Result};
pub use window::Hwnd;
