//! Run-once teardown

use tracing::debug;

/// Runs a teardown hook exactly once.
///
/// The hook runs on the first [`TeardownGuard::run`] or, failing that, when
/// the guard is dropped, so it also runs on early returns and panics.
pub struct TeardownGuard<F: FnOnce()> {
    teardown: Option<F>,
    name: String,
}

impl<F: FnOnce()> TeardownGuard<F> {
    pub fn new(name: impl Into<String>, teardown: F) -> Self {
        let name = name.into();
        debug!(name = %name, "Teardown guard armed");
        Self {
            teardown: Some(teardown),
            name,
        }
    }

    /// Runs the hook now. Returns `false` if it already ran.
    pub fn run(&mut self) -> bool {
        match self.teardown.take() {
            Some(teardown) => {
                debug!(name = %self.name, "Running teardown");
                teardown();
                true
            }
            None => false,
        }
    }

    pub fn has_run(&self) -> bool {
        self.teardown.is_none()
    }
}

impl<F: FnOnce()> Drop for TeardownGuard<F> {
    fn drop(&mut self) {
        self.run();
    }
}
