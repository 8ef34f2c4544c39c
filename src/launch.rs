use crate::{
    capabilities::launch_capabilities, config::Layout, environment::utf8_path, identity::Identity,
};
use anyhow::Result;
use caps::CapsHashSet;

const BACKEND_FLAG: &str = "--backend=rdp-backend.so";
const XWAYLAND_FLAG: &str = "--xwayland";
const BASE_LOGGER_SCOPES: &str = "log,rdp-backend";

/// Command line, retained capabilities and target user of the compositor.
///
/// Built once by the bootstrap and moved into the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub capabilities: CapsHashSet,
    pub identity: Identity,
}

impl LaunchSpec {
    pub fn compositor(layout: &Layout, identity: Identity) -> Result<Self> {
        let argv = vec![
            utf8_path(&layout.compositor)?.to_owned(),
            BACKEND_FLAG.to_owned(),
            XWAYLAND_FLAG.to_owned(),
            shell_flag(layout.shell),
            logger_scopes_flag(layout.shell),
            format!("--log={}", utf8_path(&layout.compositor_log())?),
        ];

        Ok(Self {
            argv,
            capabilities: launch_capabilities(),
            identity,
        })
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

pub fn shell_flag(shell: &str) -> String {
    let mut flag = String::from("--shell=");
    flag.push_str(shell);
    flag.push_str(".so");
    flag
}

pub fn logger_scopes_flag(shell: &str) -> String {
    let mut flag = String::from("--logger-scopes=");
    flag.push_str(BASE_LOGGER_SCOPES);
    flag.push(',');
    flag.push_str(shell);
    flag
}
