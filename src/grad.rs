//! # Gradient Recording Mode
//!
//! Forward passes only keep the intermediate activations needed for
//! backpropagation while gradient recording is enabled. Recording is on by
//! default and is switched off for a scope with [`no_grad`] or a
//! [`NoGradGuard`]:
//!
//! ```rust
//! use deepq::grad;
//!
//! assert!(grad::is_enabled());
//! let inside = grad::no_grad(grad::is_enabled);
//! assert!(!inside);
//! assert!(grad::is_enabled());
//! ```
//!
//! The flag is thread local, so scopes on different threads never interfere.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = Cell::new(true);
}

/// Whether forward passes on this thread currently record activations
pub fn is_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Disables gradient recording until dropped, then restores the previous mode.
///
/// Guards nest: an inner guard restores "disabled" rather than "enabled" when
/// an outer guard is still alive.
#[must_use = "recording is re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    previous: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        let previous = GRAD_ENABLED.with(|flag| flag.replace(false));
        NoGradGuard { previous }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.previous));
    }
}

/// Run `f` with gradient recording disabled.
pub fn no_grad<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = NoGradGuard::new();
    f()
}
