//! Progress reporting for multi-iteration fitting runs.
//!
//! # Example
//!
//! ```
//! use meshfit::algo::Progress;
//!
//! let progress = Progress::new(|iteration, total, energy| {
//!     println!("[{}/{}] E={:.3}", iteration, total, energy);
//! });
//! progress.report(0, 10, 1.5);
//! ```

/// A callback that receives one update per completed iteration.
///
/// The callback receives:
/// - `iteration`: number of iterations completed so far (1-based)
/// - `total`: number of iterations requested
/// - `energy`: total energy returned by the last step
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, f64) + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, f64) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    #[inline]
    pub fn report(&self, iteration: usize, total: usize, energy: f64) {
        (self.callback)(iteration, total, energy);
    }

    /// A reporter that discards all updates.
    pub fn none() -> Self {
        Self::new(|_, _, _| {})
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_report_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let progress = Progress::new(move |i, total, _| {
            assert!(i <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        progress.report(1, 3, 0.5);
        progress.report(2, 3, 0.25);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
