use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Error;

struct Inner {
    name: &'static str,
    limit: usize,
    value: AtomicUsize,
}

/// A named, bounded counter guarding how many concurrent instances of a
/// service kind may run at once. `acquire` never blocks: it either hands
/// back a [`Grant`] immediately or fails with [`Error::LimitReached`].
#[derive(Clone)]
pub struct Limiter(Arc<Inner>);

impl Limiter {
    pub fn new(name: &'static str, limit: usize) -> Limiter {
        Limiter(Arc::new(Inner { name, limit, value: AtomicUsize::new(0) }))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn limit(&self) -> usize {
        self.0.limit
    }

    pub fn value(&self) -> usize {
        self.0.value.load(Ordering::SeqCst)
    }

    pub fn acquire(&self) -> Result<Grant, Error> {
        let limit = self.0.limit;
        self.0
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| if v < limit { Some(v + 1) } else { None })
            .map(|_| Grant(self.0.clone()))
            .map_err(|_| Error::LimitReached(self.0.name))
    }
}

/// Releases its slot exactly once, on drop.
pub struct Grant(Arc<Inner>);

impl Drop for Grant {
    fn drop(&mut self) {
        let prev = self.0.value.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "limiter '{}' released below zero", self.0.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_fails_once_full() {
        let limiter = Limiter::new("services", 2);
        let a = limiter.acquire().unwrap();
        let b = limiter.acquire().unwrap();
        assert_eq!(limiter.value(), 2);
        assert!(matches!(limiter.acquire(), Err(Error::LimitReached("services"))));
        drop(a);
        assert_eq!(limiter.value(), 1);
        let _c = limiter.acquire().unwrap();
        assert_eq!(limiter.value(), 2);
        drop(b);
    }

    #[test]
    fn grant_release_is_exactly_one_slot() {
        let limiter = Limiter::new("terminals", 1);
        {
            let _grant = limiter.acquire().unwrap();
            assert_eq!(limiter.value(), 1);
        }
        assert_eq!(limiter.value(), 0);
    }
}
