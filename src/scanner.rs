//! The periodic scanner task that drives reconciliation passes.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{sleep, spawn, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Sender, TrySendError};
use tracing::{debug, info};

use crate::engine::Engine;



# [ derive (Debug) ]
pub struct _Scanner {
    interval_ms : Arc <AtomicU64>,
    passes      : Arc <AtomicU64>,
    wake_tx     : Sender<()>,
    stop_tx     : Sender<()>,
    worker      : Mutex <Option <JoinHandle<()>>>,
}

# [ derive (Debug, Clone) ]
pub struct Scanner ( Arc <_Scanner> );

impl Deref for Scanner {
    type Target = _Scanner;
    fn deref (&self) -> &_Scanner { &self.0 }
}



impl Scanner {

    /// Minimum scan interval, anything shorter from configs gets raised to this
    pub const MIN_INTERVAL : Duration = Duration::from_millis (50);

    /// OS notifications tend to arrive in bursts, a wake waits this long so one pass covers the burst
    pub const WAKE_DEBOUNCE : Duration = Duration::from_millis (20);

    /// Starts scanning: one pass right away, then one per interval, or sooner when woken
    pub fn start (engine:Engine, interval:Duration) -> Scanner {
        let (wake_tx, wake_rx) = bounded (1);
        let (stop_tx, stop_rx) = bounded (1);
        let interval_ms = Arc::new (AtomicU64::new (Self::clamp_ms(interval)));
        let passes = Arc::new (AtomicU64::new (0));

        let (iv, ps) = (interval_ms.clone(), passes.clone());
        let worker = spawn ( move || {
            info! ("scanner started at {} ms", iv.load(Ordering::Relaxed));
            loop {
                engine.reconcile();
                ps.fetch_add (1, Ordering::Relaxed);

                let interval = Duration::from_millis (iv.load(Ordering::Relaxed));
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(wake_rx) -> _ => {
                        sleep (Self::WAKE_DEBOUNCE);
                        // a stop that came in during the debounce wins
                        if stop_rx.try_recv().is_ok() { break }
                        let _ = wake_rx.try_recv();
                    },
                    default(interval) => { },
                }
            }
            info! ("scanner stopped");
        } );

        Scanner ( Arc::new ( _Scanner {
            interval_ms, passes, wake_tx, stop_tx,
            worker : Mutex::new (Some(worker)),
        } ) )
    }

    fn clamp_ms (interval:Duration) -> u64 {
        interval.max (Self::MIN_INTERVAL).as_millis() as u64
    }

    /// Requests a pass soon. Wakes arriving while one is already pending collapse into it.
    pub fn wake (&self) {
        match self.wake_tx.try_send (()) {
            Ok(()) => debug! ("scanner woken"),
            Err (TrySendError::Full(_)) | Err (TrySendError::Disconnected(_)) => { }
        }
    }

    /// Takes effect from the next wait on
    pub fn set_interval (&self, interval:Duration) {
        let ms = Self::clamp_ms (interval);
        if self.interval_ms.swap (ms, Ordering::Relaxed) != ms {
            info! ("scan interval set to {} ms", ms);
        }
    }

    pub fn interval (&self) -> Duration { Duration::from_millis (self.interval_ms.load(Ordering::Relaxed)) }

    /// Completed reconciliation passes so far
    pub fn passes (&self) -> u64 { self.passes.load (Ordering::Relaxed) }

    pub fn is_running (&self) -> bool {
        self.worker.lock().unwrap() .as_ref() .is_some_and (|w| !w.is_finished())
    }

    /// Stops the task and waits for an in-flight pass to finish. Calling it again is a no-op.
    pub fn stop (&self) {
        let _ = self.stop_tx.try_send (());
        if let Some(w) = self.worker.lock().unwrap().take() { let _ = w.join(); }
    }

}
