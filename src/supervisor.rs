use crate::{
    capabilities::{CapabilityManager, describe},
    error::into_io_error,
    launch::LaunchSpec,
};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, SigSet, kill},
        signalfd::{SfdFlags, SignalFd},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{Gid, Pid, Uid, chdir, initgroups, setgid, setuid},
};
use std::{
    collections::HashMap,
    ffi::{CStr, CString},
    os::unix::process::CommandExt,
    path::Path,
    process::Command,
};

/// Owns the compositor once it has been started.
pub trait ProcessSupervisor {
    /// Start `spec` and keep track of it.
    fn launch(&mut self, spec: LaunchSpec) -> Result<Pid>;

    /// Block until the session ends and return the exit code of the daemon.
    fn run(&mut self) -> Result<i32>;
}

/// Supervisor that relaunches tracked children whenever they exit.
#[derive(Debug, Default)]
pub struct ProcessMonitor {
    children: HashMap<Pid, LaunchSpec>,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> usize {
        self.children.len()
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<Pid> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or(Errno::EINVAL)
            .context("Refusing to launch an empty command line")?;

        let user = CString::new(spec.identity.name.as_str())
            .map_err(|_| Errno::EINVAL)
            .with_context(|| format!("Invalid user name {:?}", spec.identity.name))?;
        let (uid, gid) = (spec.identity.uid, spec.identity.gid);
        let home = spec.identity.home.clone();
        let manager = CapabilityManager::new(spec.capabilities.clone());

        let mut command = Command::new(program);
        command.args(args);

        // SAFETY: The daemon is single-threaded, so the forked child cannot
        // inherit a lock held by another thread.
        unsafe {
            command.pre_exec(move || {
                drop_to_user(&manager, &user, uid, gid, &home).map_err(into_io_error)
            });
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to launch {program}"))?;
        let pid = Pid::from_raw(child.id() as i32);

        info!(
            "launched {program} as pid {pid} (user {}, capabilities {})",
            spec.identity.name,
            describe(&spec.capabilities)
        );

        Ok(pid)
    }

    /// Reap every exited child and relaunch the tracked ones.
    fn reap(&mut self) -> Result<()> {
        loop {
            let status = match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(error) => return Err(error).context("Failed to reap child processes"),
                Ok(status) => status,
            };

            let Some(pid) = status.pid() else {
                continue;
            };

            let Some(spec) = self.children.remove(&pid) else {
                info!("untracked pid {pid} exited: {status:?}");
                continue;
            };

            match status {
                WaitStatus::Exited(_, code) => {
                    info!("{} exited with status {code}", spec.program());
                }
                WaitStatus::Signaled(_, signal, _) => {
                    info!("{} terminated with signal {signal}", spec.program());
                }
                other => debug!("{} changed state: {other:?}", spec.program()),
            }

            self.launch(spec)?;
        }

        Ok(())
    }

    fn terminate(&self) {
        for (pid, spec) in &self.children {
            if let Err(error) = kill(*pid, Signal::SIGTERM) {
                warn!("failed to signal {} ({pid}): {error}", spec.program());
            }
        }
    }
}

impl ProcessSupervisor for ProcessMonitor {
    fn launch(&mut self, spec: LaunchSpec) -> Result<Pid> {
        let pid = self.spawn(&spec)?;
        self.children.insert(pid, spec);
        Ok(pid)
    }

    fn run(&mut self) -> Result<i32> {
        if self.children.is_empty() {
            info!("nothing to supervise");
            return Ok(0);
        }

        let mut mask = SigSet::empty();
        for signal in [Signal::SIGCHLD, Signal::SIGTERM, Signal::SIGINT] {
            mask.add(signal);
        }
        mask.thread_block()
            .context("Failed to block supervisor signals")?;

        let signals = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC)
            .context("Failed to create signalfd")?;

        // Children may have exited before SIGCHLD was blocked.
        self.reap()?;

        loop {
            let info = match signals.read_signal() {
                Ok(Some(info)) => info,
                Ok(None) | Err(Errno::EINTR) => continue,
                Err(error) => return Err(error).context("Failed to read signalfd"),
            };

            match Signal::try_from(info.ssi_signo as i32) {
                Ok(Signal::SIGCHLD) => self.reap()?,
                Ok(signal @ (Signal::SIGTERM | Signal::SIGINT)) => {
                    info!("received {signal}, stopping {} children", self.tracked());
                    self.terminate();
                    return Ok(0);
                }
                other => bail!("Unexpected signal on signalfd: {other:?}"),
            }
        }
    }
}

/// Runs in the forked child: switch to the session user keeping only the
/// retained capabilities.
///
/// The working directory changes after `setuid`, so access to `home` is
/// checked against the session user.
fn drop_to_user(
    manager: &CapabilityManager,
    user: &CStr,
    uid: Uid,
    gid: Gid,
    home: &Path,
) -> Result<()> {
    manager.restrict_bounding_set()?;
    manager.keep_across_setuid()?;

    setgid(gid).with_context(|| format!("Failed to setgid({gid})"))?;
    initgroups(user, gid).context("Failed to initialize supplementary groups")?;
    setuid(uid).with_context(|| format!("Failed to setuid({uid})"))?;

    chdir(home).with_context(|| format!("Failed to enter {}", home.display()))?;

    manager.apply_retained()?;
    manager.validate_retained()
}
