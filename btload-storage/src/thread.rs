use crate::error::Result;
use log::{debug, error};
use std::panic::{catch_unwind, UnwindSafe};
use std::thread::{self, JoinHandle};

/// Spawn a named thread. Panic inside the thread is caught and logged,
/// so joining the handle never fails because of it.
#[inline]
pub fn spawn_named<S, F>(name: S, f: F) -> Result<JoinHandle<()>>
where
    String: From<S>,
    F: FnOnce() + UnwindSafe + Send + 'static,
{
    let thread_name = String::from(name);
    let handle = thread::Builder::new().name(thread_name).spawn(|| {
        let thd = thread::current();
        if catch_unwind(f).is_err() {
            error!(
                "thread[{:?}:{}] panic",
                thd.id(),
                thd.name().unwrap_or("unknown")
            );
            return;
        }
        debug!(
            "thread[{:?}:{}] exit",
            thd.id(),
            thd.name().unwrap_or("unknown")
        );
    })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_spawn_named() {
        let flag = Arc::new(AtomicBool::new(false));
        let f2 = Arc::clone(&flag);
        let handle = spawn_named("Test-Thread", move || {
            assert_eq!(thread::current().name(), Some("Test-Thread"));
            f2.store(true, Ordering::SeqCst);
        })
        .unwrap();
        handle.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));

        // panic is caught inside the thread.
        let handle = spawn_named("Panic-Thread", || panic!("boom")).unwrap();
        assert!(handle.join().is_ok());
    }
}
