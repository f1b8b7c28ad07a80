//! Change notification fan-out.
//!
//! A [`Notifier`] keeps a registry of subscriber channels behind its own lock. Each subscriber
//! gets a one-slot channel, so any number of notifications published before the subscriber
//! wakes up collapse into a single pending wake-up. Publishing never blocks: a full slot means
//! the subscriber already has a wake-up pending, and a disconnected slot gets pruned.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};



# [ derive (Debug) ]
pub struct _Notifier {
    name    : &'static str,
    subs    : Mutex <Vec <(u64, Sender<()>)>>,
    next_id : AtomicU64,
}

# [ derive (Debug, Clone) ]
pub struct Notifier ( Arc <_Notifier> );

impl Deref for Notifier {
    type Target = _Notifier;
    fn deref (&self) -> &_Notifier { &self.0 }
}


/// A subscriber's end of a [`Notifier`]. Dropping it is an implicit unsubscribe
/// (the notifier prunes the slot on its next publish).
# [ derive (Debug) ]
pub struct Subscription {
    id : u64,
    rx : Receiver<()>,
}

impl Subscription {
    pub fn id (&self) -> u64 { self.id }

    /// The receiving end, for use in `crossbeam_channel::select!`
    pub fn receiver (&self) -> &Receiver<()> { &self.rx }

    /// Blocks until a notification is pending. Returns false once the subscription has been
    /// closed from the publishing side (unsubscribed or notifier gone).
    pub fn wait (&self) -> bool { self.rx.recv().is_ok() }

    /// Consumes a pending notification if there is one, without blocking
    pub fn try_take (&self) -> bool { self.rx.try_recv().is_ok() }
}



impl Notifier {

    pub fn new (name: &'static str) -> Notifier {
        Notifier ( Arc::new ( _Notifier {
            name,
            subs    : Mutex::new (Vec::new()),
            next_id : AtomicU64::new (1),
        } ) )
    }

    pub fn subscribe (&self) -> Subscription {
        let (tx, rx) = bounded (1);
        let id = self.next_id.fetch_add (1, Ordering::Relaxed);
        self.subs.lock().unwrap() .push ((id, tx));
        tracing::trace! ("{} notifier: subscribed #{}", self.name, id);
        Subscription { id, rx }
    }

    /// Removes the subscriber's slot. Its receiver then reports disconnection, which is how
    /// listener tasks blocked on it get torn down.
    pub fn unsubscribe (&self, sub_id: u64) {
        self.subs.lock().unwrap() .retain (|(id,_)| *id != sub_id);
        tracing::trace! ("{} notifier: unsubscribed #{}", self.name, sub_id);
    }

    /// Wakes every live subscriber. Returns how many subscribers remain registered.
    pub fn notify (&self) -> usize {
        let mut subs = self.subs.lock().unwrap();
        subs .retain (|(id, tx)| match tx.try_send(()) {
            Ok(())                               => true,
            Err (TrySendError::Full(_))          => true,     // already has a wake-up pending
            Err (TrySendError::Disconnected(_))  => {
                tracing::debug! ("{} notifier: dropping closed subscriber #{}", self.name, id);
                false
            }
        } );
        subs.len()
    }

    pub fn subscriber_count (&self) -> usize {
        self.subs.lock().unwrap().len()
    }

}



# [ derive (Debug, Default, Clone) ]
/// sugar for a shared atomic-bool flag
pub struct Flag (Arc <AtomicBool>);

impl Flag {
    pub fn set   (&self) { self.0 .store (true,  Ordering::SeqCst) }
    pub fn clear (&self) { self.0 .store (false, Ordering::SeqCst) }

    pub fn is_set   (&self) -> bool { self.0 .load (Ordering::SeqCst) }
    pub fn is_clear (&self) -> bool { !self.0 .load (Ordering::SeqCst) }

    /// Sets the flag, returns whether it was already set
    pub fn test_and_set (&self) -> bool { self.0 .swap (true, Ordering::SeqCst) }
}



#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bursts_collapse_into_one_wakeup() {
        let n = Notifier::new ("test");
        let sub = n.subscribe();
        n.notify(); n.notify(); n.notify();
        assert!(sub.try_take());
        assert!(!sub.try_take());
    }

    #[test]
    fn every_subscriber_is_woken() {
        let n = Notifier::new ("test");
        let (a, b) = (n.subscribe(), n.subscribe());
        assert_eq!(n.notify(), 2);
        assert!(a.try_take());
        assert!(b.try_take());
    }

    #[test]
    fn unsubscribe_closes_the_receiver() {
        let n = Notifier::new ("test");
        let sub = n.subscribe();
        n.unsubscribe (sub.id());
        assert_eq!(n.subscriber_count(), 0);
        assert!(!sub.wait());
    }

    #[test]
    fn dropped_subscribers_are_pruned_without_blocking() {
        let n = Notifier::new ("test");
        let kept = n.subscribe();
        drop (n.subscribe());
        assert_eq!(n.notify(), 1);
        assert!(kept.try_take());
    }

    #[test]
    fn flag_test_and_set_reports_prior_state() {
        let f = Flag::default();
        assert!(!f.test_and_set());
        assert!(f.test_and_set());
        f.clear();
        assert!(f.is_clear());
        f.set();
        assert!(f.is_set());
    }

    #[test]
    fn pending_wakeup_survives_until_taken_across_threads() {
        let n = Notifier::new ("test");
        let sub = n.subscribe();
        let nc = n.clone();
        std::thread::spawn (move || { nc.notify(); }) .join().unwrap();
        assert!(sub.wait());
    }
}
