use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

static LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_lock_poison_once(lock: &'static str, operation: &'static str) {
    if LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(lock, operation, "lock poisoned; recovered inner value");
    }
}

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn_lock_poison_once(name, "read");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn_lock_poison_once(name, "write");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn_lock_poison_once(name, "lock");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn write_recovers_after_poison() {
        let lock = RwLock::new(5_u32);
        thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = lock.write().expect("write guard");
                    panic!("poison lock");
                })
                .join();
        });
        assert!(lock.is_poisoned());

        *write(&lock, "test") += 1;
        assert_eq!(*read(&lock, "test"), 6);
    }
}
