//! Versioned reload handles
//!
//! A writer bumps a generation counter, each subsystem remembers the last
//! generation it applied. A bump made while a tick runs is seen on the next
//! tick, and several bumps between two ticks collapse into one reload.

use std::sync::Arc;

use tokio::sync::watch;

/// Writer side: request a configuration reload
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: Arc<watch::Sender<u64>>,
}

/// Reader side owned by the subsystem loop
#[derive(Debug)]
pub struct ReloadWatch {
    rx: watch::Receiver<u64>,
}

/// Create a linked trigger/watch pair
pub fn reload_channel() -> (ReloadTrigger, ReloadWatch) {
    let (tx, rx) = watch::channel(0u64);
    (ReloadTrigger { tx: Arc::new(tx) }, ReloadWatch { rx })
}

impl ReloadTrigger {
    pub fn trigger(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Another watcher on the same generation counter, starting caught up
    pub fn subscribe(&self) -> ReloadWatch {
        ReloadWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl ReloadWatch {
    /// Returns true once for every generation change since the last call
    pub fn take_pending(&mut self) -> bool {
        match self.rx.has_changed() {
            Ok(true) => {
                self.rx.borrow_and_update();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reload_without_trigger() {
        let (_trigger, mut watch) = reload_channel();
        assert!(!watch.take_pending());
    }

    #[test]
    fn test_trigger_observed_once() {
        let (trigger, mut watch) = reload_channel();
        trigger.trigger();
        assert!(watch.take_pending());
        assert!(!watch.take_pending());
    }

    #[test]
    fn test_bursts_collapse() {
        let (trigger, mut watch) = reload_channel();
        trigger.trigger();
        trigger.trigger();
        trigger.clone().trigger();
        assert_eq!(trigger.generation(), 3);
        assert!(watch.take_pending());
        assert!(!watch.take_pending());
    }

    #[test]
    fn test_subscribers_are_independent() {
        let (trigger, mut first) = reload_channel();
        let mut second = trigger.subscribe();
        trigger.trigger();
        assert!(first.take_pending());
        assert!(second.take_pending());
        assert!(!second.take_pending());
    }
}
