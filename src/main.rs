// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr (
    all ( not(debug_assertions), target_os = "windows" ),
    windows_subsystem = "windows"
)]


fn main() {

    let conf = match winset::Config::locate() {
        Ok(conf) => conf,
        Err(e)   => { eprintln! ("winset: {}", e); std::process::exit(1) }
    };

    // we want the non-blocking log-appender guard to be here in main, to ensure any pending logs get flushed upon crash etc
    let _guard = conf.setup_log_subscriber();

    tracing::info! ("Starting Winset v{} ...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run (conf) {
        tracing::error! ("winset failed to start: {}", e);
        eprintln! ("winset: {}", e);
        std::process::exit(1)
    }

}


#[cfg(windows)]
fn run (conf: winset::Config) -> winset::Result<()> {
    use std::sync::Arc;
    use winset::win_apis::{Win32Hotkeys, Win32Source, WinEventHooks};

    let (mut hooks, window_events) = WinEventHooks::start();
    let hotkeys = Arc::new (Win32Hotkeys::start());

    let platform = winset::Platform {
        source        : Arc::new (Win32Source::default()),
        hotkeys       : Some (hotkeys.clone()),
        window_events : Some (window_events),
    };
    let res = winset::App::start (conf, platform) .map (|app| app.wait());

    hooks.stop();
    hotkeys.stop();
    res
}

#[cfg(not(windows))]
fn run (_conf: winset::Config) -> winset::Result<()> {
    tracing::warn! ("unsupported platform: window tracking needs the Win32 APIs, nothing to do");
    Ok(())
}
