use clap::{Args, Parser};
use log::LevelFilter;
use std::path::PathBuf;

const HEADING_PATHS: &str = "Paths";
const HEADING_USER: &str = "User";
const HEADING_COMPOSITOR: &str = "Compositor";
const HEADING_DEBUG: &str = "Debug";

pub const DEFAULT_LOG_ROOT: &str = "/var/log";
pub const DEFAULT_X11_DIR: &str = "/tmp/.X11-unix";
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/runtime-dir";
pub const DEFAULT_USER: &str = "wslg";
pub const DEFAULT_COMPOSITOR: &str = "/usr/bin/weston";

/// The only shell the compositor is ever started with.
pub const SHELL_NAME: &str = "rdprail-shell";

const STDERR_LOG_FILE: &str = "stderr.log";
const DUMPS_DIR: &str = "dumps";
const COMPOSITOR_LOG_FILE: &str = "weston.log";

#[derive(Parser, Debug)]
#[command(name = "sessiond", about = "Privileged graphical session bootstrap")]
pub struct Config {
    #[command(flatten)]
    pub paths: PathOptions,

    #[command(flatten)]
    pub user: UserOptions,

    #[command(flatten)]
    pub compositor: CompositorOptions,

    #[command(flatten)]
    pub debug: DebugOptions,
}

impl Config {
    pub fn layout(&self) -> Layout {
        Layout {
            log_root: self.paths.log_root.clone(),
            x11_dir: self.paths.x11_dir.clone(),
            runtime_dir: self.paths.runtime_dir.clone(),
            user: self.user.user.clone(),
            compositor: self.compositor.compositor.clone(),
            shell: SHELL_NAME,
        }
    }
}

#[derive(Args, Debug)]
pub struct PathOptions {
    #[arg(
        long,
        help = "Directory for logs and core dumps",
        default_value = DEFAULT_LOG_ROOT,
        help_heading = HEADING_PATHS
    )]
    pub log_root: PathBuf,

    #[arg(
        long,
        help = "X11 socket directory",
        default_value = DEFAULT_X11_DIR,
        help_heading = HEADING_PATHS
    )]
    pub x11_dir: PathBuf,

    #[arg(
        long,
        help = "XDG runtime directory handed to the session user",
        default_value = DEFAULT_RUNTIME_DIR,
        help_heading = HEADING_PATHS
    )]
    pub runtime_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct UserOptions {
    #[arg(
        long,
        help = "Unprivileged user the compositor runs as",
        default_value = DEFAULT_USER,
        help_heading = HEADING_USER
    )]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct CompositorOptions {
    #[arg(
        long,
        help = "Compositor executable",
        default_value = DEFAULT_COMPOSITOR,
        help_heading = HEADING_COMPOSITOR
    )]
    pub compositor: PathBuf,
}

#[derive(Args, Debug)]
pub struct DebugOptions {
    #[arg(
        long,
        help = "Default log level (overridden by RUST_LOG)",
        default_value = "info",
        help_heading = HEADING_DEBUG
    )]
    pub log_level: LevelFilter,

    #[arg(
        long,
        help = "Print the launch command line and exit",
        help_heading = HEADING_DEBUG
    )]
    pub print_launch: bool,
}

/// Fixed filesystem layout and names the bootstrap works with.
///
/// Resolved once from the command line and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub log_root: PathBuf,
    pub x11_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub user: String,
    pub compositor: PathBuf,
    pub shell: &'static str,
}

impl Layout {
    pub fn stderr_log(&self) -> PathBuf {
        self.log_root.join(STDERR_LOG_FILE)
    }

    pub fn dump_dir(&self) -> PathBuf {
        self.log_root.join(DUMPS_DIR)
    }

    pub fn compositor_log(&self) -> PathBuf {
        self.log_root.join(COMPOSITOR_LOG_FILE)
    }

    /// Rebase every directory of the layout under `root`.
    #[cfg(test)]
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            log_root: root.join("log"),
            x11_dir: root.join(".X11-unix"),
            runtime_dir: root.join("runtime-dir"),
            ..Self::default()
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from(DEFAULT_LOG_ROOT),
            x11_dir: PathBuf::from(DEFAULT_X11_DIR),
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIR),
            user: DEFAULT_USER.to_owned(),
            compositor: PathBuf::from(DEFAULT_COMPOSITOR),
            shell: SHELL_NAME,
        }
    }
}
