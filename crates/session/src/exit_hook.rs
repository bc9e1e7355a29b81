//! Process-exit sweep of the global registry.

use std::sync::Once;

static INSTALL: Once = Once::new();

/// Register the sweep with the C runtime. Safe to call repeatedly.
pub(crate) fn install() {
    INSTALL.call_once(register);
}

#[cfg(unix)]
extern "C" fn sweep() {
    // Unwinding across the C runtime is undefined behaviour.
    let _ = std::panic::catch_unwind(crate::registry::teardown_global);
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn register() {
    // SAFETY: `sweep` is a plain `extern "C" fn()` that never unwinds.
    let rc = unsafe { libc::atexit(sweep) };
    if rc != 0 {
        tracing::warn!(rc, "failed to register exit-time session teardown");
    }
}

#[cfg(not(unix))]
fn register() {
    tracing::debug!("exit-time teardown unavailable; call SessionRegistry::teardown explicitly");
}
