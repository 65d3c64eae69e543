/**
 * ÉTAT PARTAGÉ - Verrous du coordinateur
 *
 * RÔLE : Primitives de partage entre la boucle de monitoring, le handler de complétion
 * et les handlers HTTP.
 *
 * FONCTIONNEMENT :
 * - `TrackedLock<T>` : Mutex parking_lot nommé, accessible uniquement par closure
 *   synchrone (aucune garde ne sort, aucun `.await` possible sous le verrou)
 * - En build debug, un suivi par thread vérifie qu'aucun verrou suivi n'est pris
 *   pendant qu'un autre est tenu (pas d'imbrication)
 */

use parking_lot::Mutex;

/// Mutex nommé, jamais imbriqué avec un autre `TrackedLock`
pub struct TrackedLock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> TrackedLock<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Exécute `f` sous le verrou
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _held = tracker::enter(self.name);
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(debug_assertions)]
mod tracker {
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    pub struct Held;

    pub fn enter(name: &'static str) -> Held {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            assert!(
                held.is_empty(),
                "lock '{}' acquired while holding {:?}",
                name,
                held
            );
            held.push(name);
        });
        Held
    }

    impl Drop for Held {
        fn drop(&mut self) {
            HELD.with(|held| {
                held.borrow_mut().pop();
            });
        }
    }
}

#[cfg(not(debug_assertions))]
mod tracker {
    pub struct Held;

    #[inline]
    pub fn enter(_name: &'static str) -> Held {
        Held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_locks_are_allowed() {
        let a = TrackedLock::new("a", 1);
        let b = TrackedLock::new("b", 2);

        let x = a.with(|v| *v);
        let y = b.with(|v| {
            *v += x;
            *v
        });
        assert_eq!(y, 3);
        assert_eq!(a.name(), "a");
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "acquired while holding")]
    fn test_nested_locks_panic_in_debug() {
        let a = TrackedLock::new("a", 1);
        let b = TrackedLock::new("b", 2);
        a.with(|_| b.with(|v| *v));
    }
}
