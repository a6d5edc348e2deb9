// Window registry
//
// Process-scoped reference count of live windows. The first acquisition
// registers the platform window class, the last release unregisters it. The
// registry is owned by the `Windowing` subsystem, never by a global.

use parking_lot::Mutex;
use std::sync::Arc;

type Hook = Box<dyn Fn() + Send + Sync>;

pub struct WindowRegistry {
    live: Mutex<usize>,
    on_register: Hook,
    on_unregister: Hook,
}

impl WindowRegistry {
    pub fn new(
        on_register: impl Fn() + Send + Sync + 'static,
        on_unregister: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(0),
            on_register: Box::new(on_register),
            on_unregister: Box::new(on_unregister),
        })
    }

    /// Take a reference; the returned guard releases it on drop
    pub fn acquire(self: &Arc<Self>) -> Registration {
        let mut live = self.live.lock();
        if *live == 0 {
            (self.on_register)();
        }
        *live += 1;
        Registration {
            registry: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut live = self.live.lock();
        debug_assert!(*live > 0, "window registry released more often than acquired");
        *live = live.saturating_sub(1);
        if *live == 0 {
            (self.on_unregister)();
        }
    }

    pub fn live_windows(&self) -> usize {
        *self.live.lock()
    }
}

/// One live window's hold on the registry
pub struct Registration {
    registry: Arc<WindowRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry() -> (Arc<WindowRegistry>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let registered = Arc::new(AtomicUsize::new(0));
        let unregistered = Arc::new(AtomicUsize::new(0));
        let (r, u) = (Arc::clone(&registered), Arc::clone(&unregistered));
        let registry = WindowRegistry::new(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                u.fetch_add(1, Ordering::SeqCst);
            },
        );
        (registry, registered, unregistered)
    }

    #[test]
    fn registers_once_for_many_windows() {
        let (registry, registered, unregistered) = counting_registry();

        let first = registry.acquire();
        let second = registry.acquire();
        assert_eq!(registry.live_windows(), 2);
        assert_eq!(registered.load(Ordering::SeqCst), 1);

        drop(first);
        assert_eq!(unregistered.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_windows(), 0);
    }

    #[test]
    fn re_registers_after_full_release() {
        let (registry, registered, unregistered) = counting_registry();

        drop(registry.acquire());
        drop(registry.acquire());

        assert_eq!(registered.load(Ordering::SeqCst), 2);
        assert_eq!(unregistered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn acquisition_is_thread_safe() {
        let (registry, registered, unregistered) = counting_registry();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.acquire())
            })
            .collect();
        let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.live_windows(), 8);
        assert_eq!(registered.load(Ordering::SeqCst), 1);
        drop(guards);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }
}
