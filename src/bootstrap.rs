use crate::{
    config::Layout,
    environment::EnvTable,
    filesystem::DirTarget,
    host::Host,
    identity::{Identity, IdentityResolver},
    launch::LaunchSpec,
    supervisor::ProcessSupervisor,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};

/// Progress of the bootstrap. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Uninitialized,
    LoggingReady,
    PrivilegeVerified,
    IdentityResolved,
    FilesystemReady,
    EnvironmentReady,
    LimitsReady,
    DumpDirReady,
    Launched,
    Supervising,
    Terminated,
}

/// Runs the privileged setup in a fixed order, launches the compositor and
/// hands the process over to the supervisor.
///
/// There is no retry and no rollback: the first failing step ends the run
/// and its error is returned as is.
pub struct Bootstrap<H, R, S> {
    layout: Layout,
    host: H,
    resolver: R,
    supervisor: S,
    stage: Stage,
}

impl<H, R, S> Bootstrap<H, R, S>
where
    H: Host,
    R: IdentityResolver,
    S: ProcessSupervisor,
{
    pub fn new(layout: Layout, host: H, resolver: R, supervisor: S) -> Self {
        Self {
            layout,
            host,
            resolver,
            supervisor,
            stage: Stage::Uninitialized,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the whole sequence. Returns the supervisor's exit code.
    pub fn run(&mut self) -> Result<i32> {
        let result = self.run_stages();
        self.advance(Stage::Terminated);
        result
    }

    fn run_stages(&mut self) -> Result<i32> {
        self.prepare_logging()?;
        self.advance(Stage::LoggingReady);

        self.verify_privilege()?;
        self.advance(Stage::PrivilegeVerified);

        // Needs no identity; everything under the log root depends on it.
        self.prepare(DirTarget::shared(&self.layout.log_root))?;

        let identity = self.resolve_identity()?;
        self.advance(Stage::IdentityResolved);

        self.prepare(DirTarget::shared(&self.layout.x11_dir))?;
        self.prepare(DirTarget::private(
            &self.layout.runtime_dir,
            identity.uid,
            identity.gid,
        ))?;
        self.advance(Stage::FilesystemReady);

        self.configure_environment(&identity)?;
        self.advance(Stage::EnvironmentReady);

        self.host.raise_core_limit()?;
        info!("core dump size limit set to unlimited");
        self.advance(Stage::LimitsReady);

        self.prepare(DirTarget::shared(self.layout.dump_dir()))?;
        self.advance(Stage::DumpDirReady);

        let spec = LaunchSpec::compositor(&self.layout, identity)?;
        info!("launching {}", spec.argv.join(" "));
        self.supervisor
            .launch(spec)
            .context("Failed to launch compositor")?;
        self.advance(Stage::Launched);

        self.advance(Stage::Supervising);
        let code = self.supervisor.run()?;
        info!("supervisor finished with exit code {code}");

        Ok(code)
    }

    /// Best-effort: a missing log file never stops the session from starting.
    fn prepare_logging(&mut self) -> Result<()> {
        let log_file = self.layout.stderr_log();

        if let Err(error) = self.host.redirect_stderr(&log_file) {
            warn!("logging to stderr instead of {}: {error:#}", log_file.display());
        }

        self.host.restore_child_signal()
    }

    fn verify_privilege(&self) -> Result<()> {
        let level = self.host.context().require_root()?;
        debug!("privilege level: {level:?}");
        Ok(())
    }

    fn resolve_identity(&self) -> Result<Identity> {
        let identity = self.resolver.resolve(&self.layout.user)?;
        info!(
            "session user {} (uid={}, gid={}, home={})",
            identity.name,
            identity.uid,
            identity.gid,
            identity.home.display()
        );
        Ok(identity)
    }

    fn prepare(&mut self, target: DirTarget) -> Result<()> {
        self.host.prepare_directory(&target)?;
        debug!("prepared {} ({:o})", target.path.display(), target.mode);
        Ok(())
    }

    fn configure_environment(&mut self, identity: &Identity) -> Result<()> {
        let table = EnvTable::for_identity(&self.layout, identity)?;

        for (name, value) in table.iter() {
            self.host.set_env(name, value)?;
        }

        info!("environment configured ({} variables)", table.len());
        Ok(())
    }

    fn advance(&mut self, next: Stage) {
        debug!("stage {:?} -> {next:?}", self.stage);
        self.stage = next;
    }

    #[cfg(test)]
    fn parts(&self) -> (&H, &S) {
        (&self.host, &self.supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::launch_capabilities, context::ProcessContext, error::exit_code, filesystem,
    };
    use nix::{
        errno::Errno,
        unistd::{Gid, Pid, Uid, getgid, getuid},
    };
    use std::{
        collections::HashSet,
        fs,
        os::unix::fs::{MetadataExt, PermissionsExt},
        path::{Path, PathBuf},
    };
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Redirect(PathBuf),
        RestoreChildSignal,
        Prepare(DirTarget),
        SetEnv(String, String),
        RaiseCoreLimit,
    }

    #[derive(Default)]
    struct RecordingHost {
        euid: u32,
        real_fs: bool,
        fail_redirect: bool,
        fail_prepare: Option<PathBuf>,
        ops: Vec<Op>,
    }

    impl RecordingHost {
        fn root() -> Self {
            Self::default()
        }

        fn user() -> Self {
            Self {
                euid: 1000,
                ..Self::default()
            }
        }

        fn prepared(&self) -> Vec<&DirTarget> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Prepare(target) => Some(target),
                    _ => None,
                })
                .collect()
        }

        fn env(&self) -> Vec<(&str, &str)> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::SetEnv(name, value) => Some((name.as_str(), value.as_str())),
                    _ => None,
                })
                .collect()
        }
    }

    impl Host for RecordingHost {
        fn context(&self) -> ProcessContext {
            ProcessContext::new(Uid::from_raw(self.euid), Uid::from_raw(self.euid))
        }

        fn redirect_stderr(&mut self, log_file: &Path) -> Result<()> {
            self.ops.push(Op::Redirect(log_file.to_path_buf()));
            if self.fail_redirect {
                return Err(Errno::EACCES.into());
            }
            Ok(())
        }

        fn restore_child_signal(&mut self) -> Result<()> {
            self.ops.push(Op::RestoreChildSignal);
            Ok(())
        }

        fn prepare_directory(&mut self, target: &DirTarget) -> Result<()> {
            self.ops.push(Op::Prepare(target.clone()));
            if self.fail_prepare.as_deref() == Some(target.path.as_path()) {
                return Err(Errno::EACCES).context("Failed to chmod");
            }
            if self.real_fs {
                filesystem::prepare(target)?;
            }
            Ok(())
        }

        fn set_env(&mut self, name: &str, value: &str) -> Result<()> {
            self.ops.push(Op::SetEnv(name.to_owned(), value.to_owned()));
            Ok(())
        }

        fn raise_core_limit(&mut self) -> Result<()> {
            self.ops.push(Op::RaiseCoreLimit);
            Ok(())
        }
    }

    struct FixedResolver(Option<Identity>);

    impl IdentityResolver for FixedResolver {
        fn resolve(&self, name: &str) -> Result<Identity> {
            self.0
                .clone()
                .ok_or(Errno::ENOENT)
                .with_context(|| format!("User {name:?} does not exist"))
        }
    }

    #[derive(Default)]
    struct RecordingSupervisor {
        fail_launch: Option<Errno>,
        launched: Vec<LaunchSpec>,
        ran: bool,
    }

    impl ProcessSupervisor for RecordingSupervisor {
        fn launch(&mut self, spec: LaunchSpec) -> Result<Pid> {
            if let Some(errno) = self.fail_launch {
                return Err(errno).context("Failed to spawn");
            }
            self.launched.push(spec);
            Ok(Pid::from_raw(4242))
        }

        fn run(&mut self) -> Result<i32> {
            self.ran = true;
            Ok(0)
        }
    }

    fn identity() -> Identity {
        Identity {
            name: "wslg".to_owned(),
            home: PathBuf::from("/home/wslg"),
            shell: PathBuf::from("/bin/bash"),
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
        }
    }

    type TestBootstrap = Bootstrap<RecordingHost, FixedResolver, RecordingSupervisor>;

    fn bootstrap(host: RecordingHost, identity: Option<Identity>) -> TestBootstrap {
        Bootstrap::new(
            Layout::default(),
            host,
            FixedResolver(identity),
            RecordingSupervisor::default(),
        )
    }

    #[test]
    fn test_successful_run_order() -> Result<()> {
        let mut bootstrap = bootstrap(RecordingHost::root(), Some(identity()));

        assert_eq!(bootstrap.run()?, 0);
        assert_eq!(bootstrap.stage(), Stage::Terminated);

        let (host, supervisor) = bootstrap.parts();
        let uid = Uid::from_raw(1000);
        let gid = Gid::from_raw(1000);

        assert_eq!(host.ops[0], Op::Redirect(PathBuf::from("/var/log/stderr.log")));
        assert_eq!(host.ops[1], Op::RestoreChildSignal);
        assert_eq!(
            host.prepared(),
            [
                &DirTarget::shared("/var/log"),
                &DirTarget::shared("/tmp/.X11-unix"),
                &DirTarget::private("/tmp/runtime-dir", uid, gid),
                &DirTarget::shared("/var/log/dumps"),
            ]
        );

        let limit = host.ops.iter().position(|op| *op == Op::RaiseCoreLimit);
        let dumps = host
            .ops
            .iter()
            .position(|op| *op == Op::Prepare(DirTarget::shared("/var/log/dumps")));
        let last_env = host
            .ops
            .iter()
            .rposition(|op| matches!(op, Op::SetEnv(..)));
        assert!(last_env < limit && limit < dumps);

        assert_eq!(supervisor.launched.len(), 1);
        assert_eq!(supervisor.launched[0].capabilities, launch_capabilities());
        assert_eq!(supervisor.launched[0].identity, identity());
        assert!(supervisor.ran);
        Ok(())
    }

    #[test]
    fn test_environment_applied_from_identity() -> Result<()> {
        let mut bootstrap = bootstrap(RecordingHost::root(), Some(identity()));
        bootstrap.run()?;

        let (host, _) = bootstrap.parts();
        let env = host.env();
        let names: HashSet<_> = env.iter().map(|(name, _)| *name).collect();

        assert_eq!(env.len(), 14);
        assert_eq!(names.len(), 14);
        assert!(env.contains(&("HOME", "/home/wslg")));
        assert!(env.contains(&("USER", "wslg")));
        assert!(env.contains(&("LOGNAME", "wslg")));
        assert!(env.contains(&("SHELL", "/bin/bash")));
        Ok(())
    }

    #[test]
    fn test_non_root_exits_one_without_side_effects() {
        let mut bootstrap = bootstrap(RecordingHost::user(), Some(identity()));

        let error = bootstrap.run().unwrap_err();

        assert_eq!(exit_code(&error), 1);
        assert_eq!(bootstrap.stage(), Stage::Terminated);

        let (host, supervisor) = bootstrap.parts();
        assert!(host.prepared().is_empty());
        assert!(host.env().is_empty());
        assert!(!host.ops.contains(&Op::RaiseCoreLimit));
        assert!(supervisor.launched.is_empty());
        assert!(!supervisor.ran);
    }

    #[test]
    fn test_identity_failure_skips_runtime_dir() {
        let mut bootstrap = bootstrap(RecordingHost::root(), None);

        let error = bootstrap.run().unwrap_err();

        assert_eq!(exit_code(&error), Errno::ENOENT as u8);

        let (host, supervisor) = bootstrap.parts();
        assert_eq!(host.prepared(), [&DirTarget::shared("/var/log")]);
        assert!(host.env().is_empty());
        assert!(supervisor.launched.is_empty());
    }

    #[test]
    fn test_spawn_failure_never_enters_run() {
        let mut bootstrap = Bootstrap::new(
            Layout::default(),
            RecordingHost::root(),
            FixedResolver(Some(identity())),
            RecordingSupervisor {
                fail_launch: Some(Errno::ENOEXEC),
                ..RecordingSupervisor::default()
            },
        );

        let error = bootstrap.run().unwrap_err();

        assert_eq!(exit_code(&error), Errno::ENOEXEC as u8);
        assert!(!bootstrap.parts().1.ran);
    }

    #[test]
    fn test_chmod_failure_aborts() {
        let host = RecordingHost {
            fail_prepare: Some(PathBuf::from("/tmp/.X11-unix")),
            ..RecordingHost::root()
        };
        let mut bootstrap = bootstrap(host, Some(identity()));

        let error = bootstrap.run().unwrap_err();

        assert_eq!(exit_code(&error), Errno::EACCES as u8);

        let (host, supervisor) = bootstrap.parts();
        assert_eq!(host.prepared().len(), 2);
        assert!(host.env().is_empty());
        assert!(supervisor.launched.is_empty());
    }

    #[test]
    fn test_log_redirect_failure_is_tolerated() -> Result<()> {
        let host = RecordingHost {
            fail_redirect: true,
            ..RecordingHost::root()
        };
        let mut bootstrap = bootstrap(host, Some(identity()));

        assert_eq!(bootstrap.run()?, 0);
        assert_eq!(bootstrap.parts().1.launched.len(), 1);
        Ok(())
    }

    #[test]
    fn test_second_run_is_idempotent_on_disk() -> Result<()> {
        let root = tempdir()?;
        let layout = Layout::rooted_at(root.path());
        let owner = Identity {
            uid: getuid(),
            gid: getgid(),
            ..identity()
        };

        let snapshot = |layout: &Layout| -> Result<Vec<(u32, u32, u32)>> {
            [
                layout.log_root.clone(),
                layout.x11_dir.clone(),
                layout.runtime_dir.clone(),
                layout.dump_dir(),
            ]
            .iter()
            .map(|path| -> Result<(u32, u32, u32)> {
                let metadata = fs::metadata(path)?;
                Ok((
                    metadata.permissions().mode() & 0o7777,
                    metadata.uid(),
                    metadata.gid(),
                ))
            })
            .collect()
        };

        let mut states = Vec::new();
        for _ in 0..2 {
            let host = RecordingHost {
                real_fs: true,
                ..RecordingHost::root()
            };
            let mut bootstrap = Bootstrap::new(
                layout.clone(),
                host,
                FixedResolver(Some(owner.clone())),
                RecordingSupervisor::default(),
            );

            assert_eq!(bootstrap.run()?, 0);
            states.push(snapshot(&layout)?);
        }

        assert_eq!(states[0], states[1]);
        assert_eq!(states[0][0].0, 0o777);
        assert_eq!(states[0][1].0, 0o777);
        assert_eq!(
            states[0][2],
            (0o700, owner.uid.as_raw(), owner.gid.as_raw())
        );
        assert_eq!(states[0][3].0, 0o777);
        Ok(())
    }
}
