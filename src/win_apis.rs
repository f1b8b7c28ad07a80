#![ allow (non_upper_case_globals, non_snake_case, clippy::missing_safety_doc) ]

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::size_of;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{spawn, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use windows::core::PWSTR;
use windows::Win32::Foundation::{BOOL, CloseHandle, HMODULE, HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::{
    GetCurrentThreadId, OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW
};
use windows::Win32::UI::Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, MOD_WIN, RegisterHotKey, UnregisterHotKey,
    VIRTUAL_KEY, VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE, VK_F1, VK_HOME, VK_INSERT, VK_LEFT, VK_NEXT, VK_NUMPAD0,
    VK_PAUSE, VK_PRIOR, VK_RETURN, VK_RIGHT, VK_SPACE, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetMessageW, GetWindowPlacement, GetWindowTextW, GetWindowThreadProcessId, IsWindow, IsWindowVisible,
    PeekMessageW, PostThreadMessageW, SetForegroundWindow, ShowWindowAsync, MSG, PM_NOREMOVE, SW_RESTORE, SW_SHOW,
    SW_SHOWMINIMIZED, WINDOWPLACEMENT, WM_HOTKEY, WM_USER,
    EVENT_OBJECT_DESTROY, EVENT_OBJECT_HIDE, EVENT_OBJECT_NAMECHANGE, EVENT_OBJECT_SHOW,
};

use crate::error::HotkeyError;
use crate::hotkeys::{HotkeyAction, HotkeyBackend, KeyChord};
use crate::window::{Hwnd, RawWindow, WindowEvent, WindowSource};



const KILL_MSG : u32 = WM_USER + 1;
const REQ_MSG  : u32 = WM_USER + 2;

fn hw (hwnd:Hwnd) -> HWND { HWND (hwnd as *mut c_void) }



/*****  window queries  ******/

pub fn check_window_visible (hwnd:Hwnd) -> bool { unsafe {
    IsWindowVisible (hw(hwnd)) .as_bool()
} }

pub fn get_window_text (hwnd:Hwnd) -> String { unsafe {
    const MAX_LEN : usize = 512;
    let mut lpstr = [0u16; MAX_LEN];
    let copied_len = GetWindowTextW (hw(hwnd), &mut lpstr);
    String::from_utf16_lossy (&lpstr[..(copied_len.max(0) as usize)])
} }

pub fn get_window_pid (hwnd:Hwnd) -> u32 { unsafe {
    let mut pid : u32 = 0;
    let _ = GetWindowThreadProcessId (hw(hwnd), Some(&mut pid));
    pid
} }

fn get_pid_exe_path (pid:u32) -> Option<String> { unsafe {
    const MAX_LEN : usize = 1024;
    let handle = OpenProcess (PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), pid) .ok()?;
    let mut lpstr = [0u16; MAX_LEN];
    let mut lpdwsize = MAX_LEN as u32;
    let res = QueryFullProcessImageNameW (handle, PROCESS_NAME_WIN32, PWSTR::from_raw(lpstr.as_mut_ptr()), &mut lpdwsize);
    let _ = CloseHandle (handle);
    res.ok()?;
    Some ( String::from_utf16_lossy (&lpstr[..(lpdwsize as usize)]) )
} }

/// Exe file name of the process owning this pid, e.g. `Dofus.exe`
pub fn get_pid_exe_name (pid:u32) -> Option<String> {
    get_pid_exe_path (pid) .and_then (|p| Path::new(&p).file_name() .map (|f| f.to_string_lossy().to_string()))
}

pub fn window_activate (hwnd:Hwnd) -> bool { unsafe {
    // restores minimized windows, just shows the rest
    let mut win_state = WINDOWPLACEMENT { length: size_of::<WINDOWPLACEMENT>() as u32, ..Default::default() };
    let _ = GetWindowPlacement (hw(hwnd), &mut win_state);
    if win_state.showCmd == SW_SHOWMINIMIZED.0 as u32 {
        let _ = ShowWindowAsync (hw(hwnd), SW_RESTORE);
    } else {
        let _ = ShowWindowAsync (hw(hwnd), SW_SHOW);
    }
    SetForegroundWindow (hw(hwnd)) .as_bool()
} }


unsafe extern "system" fn enum_windows_cb (hwnd:HWND, acc:LPARAM) -> BOOL {
    let acc = &mut *(acc.0 as *mut Vec<Hwnd>);
    acc.push (hwnd.0 as Hwnd);
    BOOL (true as i32)
}

/// All top-level windows, in the OS's z-order
pub fn get_top_level_windows () -> Vec<Hwnd> { unsafe {
    let mut acc : Vec<Hwnd> = Vec::new();
    if let Err(e) = EnumWindows (Some(enum_windows_cb), LPARAM (&mut acc as *mut Vec<Hwnd> as isize)) {
        warn! ("EnumWindows failed partway: {:?}", e);
    }
    acc
} }



/// The OS window source: visible top-level windows of the configured process
# [ derive (Debug, Default) ]
pub struct Win32Source {
    // pid -> exe name, for the processes seen in the last pass
    exe_names : Mutex <HashMap <u32, Option<String>>>,
}

impl Win32Source {
    fn exe_name (&self, pid:u32) -> Option<String> {
        self.exe_names.lock().unwrap() .entry (pid) .or_insert_with (|| get_pid_exe_name(pid)) .clone()
    }
}

impl WindowSource for Win32Source {

    fn list_windows (&self, process_filter:&str) -> Vec<RawWindow> {
        let mut seen_pids = Vec::new();
        let wins = get_top_level_windows() .into_iter()
            .filter (|h| check_window_visible(*h))
            .filter_map (|h| {
                let pid = get_window_pid (h);
                seen_pids.push (pid);
                let exe = self.exe_name (pid);
                if exe.is_none() { debug! ("could not resolve the process of {:?} (pid {})", h, pid) }
                exe .filter (|e| e.eq_ignore_ascii_case (process_filter))
                    .map (|_| RawWindow::new (h, pid, &get_window_text(h)))
            } ) .collect::<Vec<_>>();
        self.exe_names.lock().unwrap() .retain (|pid, _| seen_pids.contains(pid));
        wins
    }

    fn window_title (&self, hwnd:Hwnd) -> Option<String> {
        unsafe { IsWindow (hw(hwnd)) .as_bool() } .then (|| get_window_text (hwnd))
    }

    fn bring_to_front (&self, hwnd:Hwnd) -> bool {
        window_activate (hwnd)
    }

}




/*****  win-event hooks  ******/

// the hook callback gets no context pointer, so reports go out through this
static window_event_tx : Lazy <Mutex <Option <Sender<WindowEvent>>>> = Lazy::new (|| Mutex::new (None));


/// A thread holding WinEvent hooks for window show/hide/destroy/title-change events
# [ derive (Debug) ]
pub struct WinEventHooks {
    thread_id : u32,
    worker    : Option <JoinHandle<()>>,
}

impl WinEventHooks {

    pub fn start () -> (WinEventHooks, Receiver<WindowEvent>) {
        let (tx, rx) = unbounded();
        *window_event_tx.lock().unwrap() = Some(tx);

        let (ready_tx, ready_rx) = bounded (1);
        let worker = spawn ( move || unsafe {
            /*  0x8001 EVENT_OBJECT_DESTROY, 0x8002 EVENT_OBJECT_SHOW, 0x8003 EVENT_OBJECT_HIDE, 0x800C EVENT_OBJECT_NAMECHANGE
                (the object ranges are kept narrow since others like 0x800B fire continuously on pointer motion)
                hooks are out-of-context (flags 0), so callbacks come in on this thread's message loop */
            let hooks = [
                SetWinEventHook (EVENT_OBJECT_DESTROY, EVENT_OBJECT_HIDE, HMODULE::default(), Some(win_event_hook_cb), 0, 0, 0),
                SetWinEventHook (EVENT_OBJECT_NAMECHANGE, EVENT_OBJECT_NAMECHANGE, HMODULE::default(), Some(win_event_hook_cb), 0, 0, 0),
            ];
            let mut msg = MSG::default();
            let _ = PeekMessageW (&mut msg, HWND::default(), 0, 0, PM_NOREMOVE);
            // ^^ makes sure this thread has a message queue before anyone posts the kill msg to it
            let _ = ready_tx.send (GetCurrentThreadId());

            while BOOL(0) != GetMessageW (&mut msg, HWND::default(), 0, 0) {
                if msg.message == KILL_MSG { break }
            }
            hooks .iter() .filter (|h| !h.is_invalid()) .for_each (|h| { let _ = UnhookWinEvent (*h); });
            debug! ("win-event hook thread exiting");
        } );
        let thread_id = ready_rx.recv().unwrap_or_default();
        info! ("win-event hooks set");
        (WinEventHooks { thread_id, worker: Some(worker) }, rx)
    }

    pub fn stop (&mut self) {
        *window_event_tx.lock().unwrap() = None;
        if self.thread_id != 0 { unsafe {
            let _ = PostThreadMessageW (self.thread_id, KILL_MSG, WPARAM::default(), LPARAM::default());
        } }
        if let Some(w) = self.worker.take() { let _ = w.join(); }
    }
}

unsafe extern "system" fn win_event_hook_cb (
    _id_hook: HWINEVENTHOOK, event: u32, hwnd: HWND,
    id_object: i32, id_child: i32, _id_thread: u32, _event_time: u32
) {
    // only whole-window events, not ones about child objects within a window
    if id_object != 0 || id_child != 0 { return }
    let h = hwnd.0 as Hwnd;
    let ev = match event {
        EVENT_OBJECT_SHOW       => WindowEvent::Shown (h),
        EVENT_OBJECT_HIDE       => WindowEvent::Hidden (h),
        EVENT_OBJECT_DESTROY    => WindowEvent::Destroyed (h),
        EVENT_OBJECT_NAMECHANGE => WindowEvent::TitleChanged (h),
        _ => return,
    };
    if let Some(tx) = window_event_tx.lock().unwrap().as_ref() { let _ = tx.send (ev); }
}




/*****  global hotkeys  ******/

/// Virtual-key code for a key name as written in key descriptors
pub fn key_name_to_vk (key:&str) -> Option<VIRTUAL_KEY> {
    let key = key.to_uppercase();
    let offset = |base:VIRTUAL_KEY, n:u16| VIRTUAL_KEY (base.0 + n);
    if let Some(n) = key.strip_prefix('F') .and_then (|n| n.parse::<u16>().ok()) {
        return (1..=24).contains(&n) .then (|| offset (VK_F1, n - 1))
    }
    if let Some(n) = key.strip_prefix("NUMPAD") .and_then (|n| n.parse::<u16>().ok()) {
        return (n <= 9) .then (|| offset (VK_NUMPAD0, n))
    }
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        // letters and digits share their ascii codes with their vk codes
        return c.is_ascii_alphanumeric() .then (|| VIRTUAL_KEY (c as u16))
    }
    Some ( match key.as_str() {
        "SPACE"                => VK_SPACE,
        "TAB"                  => VK_TAB,
        "ENTER" | "RETURN"     => VK_RETURN,
        "ESC" | "ESCAPE"       => VK_ESCAPE,
        "DEL" | "DELETE"       => VK_DELETE,
        "INS" | "INSERT"       => VK_INSERT,
        "HOME"                 => VK_HOME,
        "END"                  => VK_END,
        "PGUP" | "PAGEUP"      => VK_PRIOR,
        "PGDN" | "PAGEDOWN"    => VK_NEXT,
        "UP"                   => VK_UP,
        "DOWN"                 => VK_DOWN,
        "LEFT"                 => VK_LEFT,
        "RIGHT"                => VK_RIGHT,
        "PAUSE"                => VK_PAUSE,
        _                      => return None,
    } )
}

fn chord_modifiers (c:&KeyChord) -> HOT_KEY_MODIFIERS {
    let mut mods = MOD_NOREPEAT;
    if c.ctrl  { mods |= MOD_CONTROL }
    if c.alt   { mods |= MOD_ALT }
    if c.shift { mods |= MOD_SHIFT }
    if c.win   { mods |= MOD_WIN }
    mods
}


enum HotkeyReq {
    Register   (Vec<(HotkeyAction, KeyChord)>, Sender<Result<(), HotkeyError>>),
    Unregister (Sender<Result<(), HotkeyError>>),
}


/// RegisterHotKey backend. Hotkeys belong to the thread that registered them, so registration
/// requests are handed to a dedicated message-loop thread that also receives the WM_HOTKEY messages.
pub struct Win32Hotkeys {
    thread_id : AtomicU32,
    req_tx    : Sender<HotkeyReq>,
    press_rx  : Receiver<HotkeyAction>,
    worker    : Mutex <Option <JoinHandle<()>>>,
}

impl Win32Hotkeys {

    pub fn start () -> Win32Hotkeys {
        let (req_tx, req_rx) = unbounded::<HotkeyReq>();
        let (press_tx, press_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded (1);

        let worker = spawn ( move || unsafe {
            let mut msg = MSG::default();
            let _ = PeekMessageW (&mut msg, HWND::default(), 0, 0, PM_NOREMOVE);
            let _ = ready_tx.send (GetCurrentThreadId());

            let mut bound : Vec<HotkeyAction> = Vec::new();
            // ^^ the registration id of each hotkey is its index here
            while BOOL(0) != GetMessageW (&mut msg, HWND::default(), 0, 0) {
                match msg.message {
                    WM_HOTKEY => {
                        if let Some(action) = bound.get (msg.wParam.0) { let _ = press_tx.send (*action); }
                    }
                    REQ_MSG => {
                        while let Ok(req) = req_rx.try_recv() {
                            match req {
                                HotkeyReq::Register (bindings, reply) => {
                                    unregister_ids (&mut bound);
                                    let _ = reply.send (register_ids (&mut bound, &bindings));
                                }
                                HotkeyReq::Unregister (reply) => {
                                    unregister_ids (&mut bound);
                                    let _ = reply.send (Ok(()));
                                }
                            }
                        }
                    }
                    KILL_MSG => break,
                    _ => { }
                }
            }
            unregister_ids (&mut bound);
            debug! ("hotkey thread exiting");
        } );

        let thread_id = ready_rx.recv().unwrap_or_default();
        Win32Hotkeys {
            thread_id : AtomicU32::new (thread_id),
            req_tx, press_rx,
            worker    : Mutex::new (Some(worker)),
        }
    }

    fn request (&self, make_req: impl FnOnce(Sender<Result<(), HotkeyError>>) -> HotkeyReq) -> Result<(), HotkeyError> {
        let thread_id = self.thread_id.load (Ordering::SeqCst);
        if thread_id == 0 { return Err (HotkeyError::BackendGone) }
        let (reply_tx, reply_rx) = bounded (1);
        self.req_tx.send (make_req(reply_tx)) .map_err (|_| HotkeyError::BackendGone)?;
        unsafe { PostThreadMessageW (thread_id, REQ_MSG, WPARAM::default(), LPARAM::default()) }
            .map_err (|_| HotkeyError::BackendGone)?;
        reply_rx.recv() .map_err (|_| HotkeyError::BackendGone)?
    }

    pub fn stop (&self) {
        let thread_id = self.thread_id.swap (0, Ordering::SeqCst);
        if thread_id != 0 { unsafe {
            let _ = PostThreadMessageW (thread_id, KILL_MSG, WPARAM::default(), LPARAM::default());
        } }
        if let Some(w) = self.worker.lock().unwrap().take() { let _ = w.join(); }
    }
}

fn register_ids (bound:&mut Vec<HotkeyAction>, bindings:&[(HotkeyAction, KeyChord)]) -> Result<(), HotkeyError> {
    for (action, chord) in bindings {
        let vk = key_name_to_vk (&chord.key) .ok_or_else (|| HotkeyError::UnknownKey (chord.key.clone()))?;
        let id = bound.len() as i32;
        if let Err(e) = unsafe { RegisterHotKey (HWND::default(), id, chord_modifiers(chord), vk.0 as u32) } {
            error! ("RegisterHotKey failed for {}: {:?}", chord, e);
            unregister_ids (bound);
            return Err ( HotkeyError::Refused { descriptor: chord.to_string(), reason: e.message().to_string() } )
        }
        bound.push (*action);
    }
    Ok(())
}

fn unregister_ids (bound:&mut Vec<HotkeyAction>) {
    for id in 0 .. bound.len() {
        let _ = unsafe { UnregisterHotKey (HWND::default(), id as i32) };
    }
    bound.clear();
}

impl HotkeyBackend for Win32Hotkeys {
    fn register_all (&self, bindings:&[(HotkeyAction, KeyChord)]) -> Result<(), HotkeyError> {
        // key names are checked up front so a bad one doesnt cost us the current registrations
        if let Some((_, c)) = bindings .iter() .find (|(_, c)| key_name_to_vk(&c.key).is_none()) {
            return Err (HotkeyError::UnknownKey (c.key.clone()))
        }
        self.request (|reply| HotkeyReq::Register (bindings.to_vec(), reply))
    }
    fn unregister_all (&self) {
        if let Err(e) = self.request (HotkeyReq::Unregister) { debug! ("hotkey unregister skipped: {}", e) }
    }
    fn presses (&self) -> Receiver<HotkeyAction> { self.press_rx.clone() }
}




#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_names_map_to_virtual_keys() {
        assert_eq!(key_name_to_vk ("F1"), Some(VK_F1));
        assert_eq!(key_name_to_vk ("f12").map(|v| v.0), Some(VK_F1.0 + 11));
        assert_eq!(key_name_to_vk ("A").map(|v| v.0), Some(0x41));
        assert_eq!(key_name_to_vk ("7").map(|v| v.0), Some(0x37));
        assert_eq!(key_name_to_vk ("PgDn"), Some(VK_NEXT));
        assert_eq!(key_name_to_vk ("F25"), None);
        assert_eq!(key_name_to_vk ("Hyper"), None);
    }

    #[test]
    fn modifiers_always_suppress_autorepeat() {
        let c = KeyChord::parse ("Ctrl+Shift+F1").unwrap();
        assert_eq!(chord_modifiers (&c), MOD_NOREPEAT | MOD_CONTROL | MOD_SHIFT);
    }
}
