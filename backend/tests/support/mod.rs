//! Shared helpers for integration tests.

use parking_lot::Mutex;
use std::collections::HashMap;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily changed.
///
/// Tests in one binary run in parallel and the environment is process-global,
/// so callers are serialized. Previous values are restored even if `f` panics.
///
/// `Some(v)` sets a variable, `None` removes it. When a key appears more than
/// once the last entry wins.
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock();
    let _restore = EnvRestore::apply(changes);
    f()
}

struct EnvRestore {
    previous: HashMap<String, Option<String>>,
}

impl EnvRestore {
    fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        let mut previous = HashMap::new();
        for (key, value) in changes {
            previous
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
            set_or_remove(key, *value);
        }
        Self { previous }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain() {
            set_or_remove(&key, value.as_deref());
        }
    }
}

fn set_or_remove(key: &str, value: Option<&str>) {
    match value {
        Some(v) => std::env::set_var(key, v),
        None => std::env::remove_var(key),
    }
}
