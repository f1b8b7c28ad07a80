//! Focus cycling over the engine's sorted view.

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::window::Hwnd;



impl Engine {

    /// Activates the window after the active one, wrapping at the end. Returns the newly active handle.
    pub fn focus_next (&self) -> Option<Hwnd> { self.focus_step (1) }

    /// Activates the window before the active one, wrapping at the start
    pub fn focus_prev (&self) -> Option<Hwnd> { self.focus_step (-1) }

    fn focus_step (&self, step:i64) -> Option<Hwnd> {
        let hwnd = {
            let mut snap = self.lock_state();
            let n = snap.sorted.len();
            if n == 0 { return None }
            let cur = snap.active .and_then (|h| snap.windows.get(&h)) .map (|w| w.order as i64);
            // with nothing active, either direction lands on the first window
            let idx = cur .map (|c| (c + step).rem_euclid (n as i64) as usize) .unwrap_or(0);
            let hwnd = snap.sorted[idx];
            snap.active = Some(hwnd);
            hwnd
        };
        debug! ("focus step {:+} -> {:?}", step, hwnd);
        self.raise (hwnd);
        Some(hwnd)
    }

    /// Explicit jump to a window (e.g. a click on its row). Unknown handles are ignored.
    pub fn activate (&self, hwnd:Hwnd) -> bool {
        {
            let mut snap = self.lock_state();
            if !snap.windows.contains_key (&hwnd) { return false }
            snap.active = Some(hwnd);
        }
        debug! ("activating {:?}", hwnd);
        self.raise (hwnd);
        true
    }

    fn raise (&self, hwnd:Hwnd) {
        // the OS call can block on a hung window, so its made outside the state lock
        if !self.source.bring_to_front (hwnd) {
            warn! ("bring-to-front refused for {:?}", hwnd);
        }
        self.changes.notify();
    }

}
