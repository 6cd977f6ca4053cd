use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Serializes commands per device selector. The bridge executable is not
/// assumed to be re-entrant against a single device, so concurrent callers
/// targeting the same selector queue up here while different devices
/// proceed in parallel. Host-level commands (no selector) share one slot.
pub struct DeviceSerializer {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceSerializer {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, selector: Option<&str>) -> Arc<Mutex<()>> {
        let key = selector.unwrap_or("<host>").to_string();
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(key).or_default())
    }

    /// Runs `operation` while holding the selector's slot.
    pub fn run_serialized<T>(
        &self,
        selector: Option<&str>,
        operation: impl FnOnce() -> T,
    ) -> T {
        let slot = self.slot(selector);
        let _guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        operation()
    }
}

impl Default for DeviceSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn serializes_same_selector() {
        let serializer = Arc::new(DeviceSerializer::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let serializer = Arc::clone(&serializer);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(std::thread::spawn(move || {
                serializer.run_serialized(Some("ABC123"), || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                });
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_selectors_do_not_block_each_other() {
        let serializer = Arc::new(DeviceSerializer::new());
        let first = Arc::clone(&serializer);
        let handle = std::thread::spawn(move || {
            first.run_serialized(Some("AAA"), || {
                std::thread::sleep(Duration::from_millis(100));
            });
        });
        // Must complete while AAA is still held.
        let started = std::time::Instant::now();
        serializer.run_serialized(Some("BBB"), || {});
        assert!(started.elapsed() < Duration::from_millis(80));
        handle.join().expect("join");
    }
}
