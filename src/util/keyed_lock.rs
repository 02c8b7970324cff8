use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::OwnedMutexGuard;

/// Per-key async mutual exclusion. Lock entries live only as long as somebody holds or waits for
///  them.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}
impl KeyedLocks {
    pub fn new() -> KeyedLocks {
        Default::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = match self.locks.lock() {
                Ok(l) => l,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, weak| weak.strong_count() > 0);

            match locks.get(key).and_then(|weak| weak.upgrade()) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn num_entries(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let in_critical_section = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let locks = locks.clone();
            let in_critical_section = in_critical_section.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("a").await;
                assert_eq!(in_critical_section.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_critical_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a").await;
        }
        let _b = locks.lock("b").await;
        assert_eq!(locks.num_entries(), 1);
    }
}
