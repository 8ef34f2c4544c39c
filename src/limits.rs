use anyhow::{Context, Result};
use nix::sys::{
    resource::{RLIM_INFINITY, Resource, setrlimit},
    signal::{SigHandler, Signal, signal},
};

/// `ulimit -c unlimited` for this process and everything it spawns.
pub(crate) fn raise_core_limit() -> Result<()> {
    setrlimit(Resource::RLIMIT_CORE, RLIM_INFINITY, RLIM_INFINITY)
        .context("Failed to set RLIMIT_CORE to unlimited")
}

/// Put `SIGCHLD` back to its default disposition.
///
/// An inherited `SIG_IGN` makes the kernel auto-reap children, which breaks
/// `waitpid` for this process and for the compositor's own children.
pub(crate) fn restore_child_signal() -> Result<()> {
    // SAFETY: Installs the default disposition, no handler code runs.
    unsafe { signal(Signal::SIGCHLD, SigHandler::SigDfl) }
        .context("Failed to restore default SIGCHLD handling")?;
    Ok(())
}
