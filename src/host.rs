use crate::{
    context::ProcessContext,
    environment,
    filesystem::{self, DirTarget},
    limits, logging,
};
use anyhow::Result;
use std::path::Path;

/// Process-global state the bootstrap touches.
///
/// Every mutation of the filesystem, environment, resource limits and signal
/// dispositions goes through here, in the order the bootstrap calls it.
pub trait Host {
    fn context(&self) -> ProcessContext;
    fn redirect_stderr(&mut self, log_file: &Path) -> Result<()>;
    fn restore_child_signal(&mut self) -> Result<()>;
    fn prepare_directory(&mut self, target: &DirTarget) -> Result<()>;
    fn set_env(&mut self, name: &str, value: &str) -> Result<()>;
    fn raise_core_limit(&mut self) -> Result<()>;
}

/// The running process.
#[derive(Debug, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn context(&self) -> ProcessContext {
        ProcessContext::current()
    }

    fn redirect_stderr(&mut self, log_file: &Path) -> Result<()> {
        logging::redirect_stderr(log_file)
    }

    fn restore_child_signal(&mut self) -> Result<()> {
        limits::restore_child_signal()
    }

    fn prepare_directory(&mut self, target: &DirTarget) -> Result<()> {
        filesystem::prepare(target)
    }

    fn set_env(&mut self, name: &str, value: &str) -> Result<()> {
        environment::set_var(name, value)
    }

    fn raise_core_limit(&mut self) -> Result<()> {
        limits::raise_core_limit()
    }
}
