//! Time-windowed value cache.
//!
//! `ClockedCache` keeps the last value produced by an expensive OS query
//! together with the moment it was produced. Readers get the stored value
//! while it is younger than the freshness window; once the window elapses
//! (or a reload is forced) the owning collector re-runs its query.

use std::time::{Duration, Instant};

/// A value plus the time it was last refreshed.
///
/// The cache starts empty, so the first read always refreshes.
#[derive(Debug, Clone)]
pub struct ClockedCache<T> {
    value: Option<T>,
    last_refresh: Option<Instant>,
    window: Duration,
}

impl<T> ClockedCache<T> {
    /// Creates an empty cache with the given freshness window.
    pub fn new(window: Duration) -> Self {
        Self {
            value: None,
            last_refresh: None,
            window,
        }
    }

    /// Returns the freshness window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Changes the freshness window. Takes effect on the next read.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Returns when the value was last refreshed.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.last_refresh
    }

    /// Returns the stored value without checking freshness.
    pub fn peek(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Whether a read at `now` must refresh the value.
    pub fn needs_refresh(&self, force: bool, now: Instant) -> bool {
        if force || self.value.is_none() {
            return true;
        }
        match self.last_refresh {
            Some(at) => now.saturating_duration_since(at) >= self.window,
            None => true,
        }
    }

    /// Stores a freshly computed value stamped with `at`.
    pub fn store_at(&mut self, value: T, at: Instant) {
        self.value = Some(value);
        self.last_refresh = Some(at);
    }

    /// Stores a freshly computed value stamped with the current time.
    pub fn store(&mut self, value: T) {
        self.store_at(value, Instant::now());
    }

    /// Returns the cached value, running `refresh` first if it is stale.
    ///
    /// The refresh time is stamped after `refresh` completes.
    pub fn get_or_refresh(&mut self, force: bool, refresh: impl FnOnce() -> T) -> &T {
        if self.needs_refresh(force, Instant::now()) {
            self.value = None;
        }
        let last_refresh = &mut self.last_refresh;
        self.value.get_or_insert_with(|| {
            let value = refresh();
            *last_refresh = Some(Instant::now());
            value
        })
    }

    /// Same as [`get_or_refresh`](Self::get_or_refresh) with an explicit clock.
    pub fn get_or_refresh_at(
        &mut self,
        force: bool,
        now: Instant,
        refresh: impl FnOnce() -> T,
    ) -> &T {
        if self.needs_refresh(force, now) {
            self.value = None;
        }
        let last_refresh = &mut self.last_refresh;
        self.value.get_or_insert_with(|| {
            let value = refresh();
            *last_refresh = Some(now);
            value
        })
    }
}
