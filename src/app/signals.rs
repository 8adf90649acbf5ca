use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_termination(_signum: libc::c_int) {
    TERMINATION_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn install(signum: libc::c_int, handler: libc::sighandler_t) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = handler;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow::anyhow!(
                    "failed to update signal action for {signum}"
                ));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// SIGINT/SIGTERM turn into a flag the supervisor polls; the previous
/// handlers come back when this guard is dropped.
pub(crate) struct TerminationSignals {
    #[cfg(unix)]
    _guards: Vec<ScopedSigaction>,
}

impl TerminationSignals {
    #[cfg(unix)]
    pub(crate) fn install() -> Result<Self> {
        TERMINATION_REQUESTED.store(false, Ordering::SeqCst);
        let handler = on_termination as extern "C" fn(libc::c_int) as libc::sighandler_t;
        let guards = vec![
            ScopedSigaction::install(libc::SIGINT, handler)?,
            ScopedSigaction::install(libc::SIGTERM, handler)?,
        ];
        Ok(Self { _guards: guards })
    }

    #[cfg(not(unix))]
    pub(crate) fn install() -> Result<Self> {
        TERMINATION_REQUESTED.store(false, Ordering::SeqCst);
        Ok(Self {})
    }

    pub(crate) fn requested(&self) -> bool {
        TERMINATION_REQUESTED.load(Ordering::SeqCst)
    }

    /// Startup checkpoint: true when a signal arrived while `phase` ran.
    pub(crate) fn interrupted_during(&self, phase: &str) -> bool {
        let requested = self.requested();
        if requested {
            tracing::info!(phase, "termination requested during startup");
        }
        requested
    }
}
