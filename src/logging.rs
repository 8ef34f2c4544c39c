use anyhow::{Context, Result};
use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use nix::unistd::dup2_stderr;
use std::{
    fs::OpenOptions,
    io::Write,
    os::{
        fd::{AsRawFd, IntoRawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
};

const PROGRAM: &str = "sessiond";

/// r--r--r--: the daemon keeps writing through its open descriptor.
const LOG_FILE_MODE: u32 = 0o444;

/// syslog priority understood by the log collector in front of stderr.
fn priority(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

/// Install the `<priority>sessiond: message` logger on stderr.
///
/// `RUST_LOG` wins over `default_level`.
pub fn init(default_level: LevelFilter) {
    let env = Env::default().default_filter_or(default_level.to_string());

    let result = Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "<{}>{}: {}",
                priority(record.level()),
                PROGRAM,
                record.args()
            )
        })
        .try_init();

    if let Err(error) = result {
        eprintln!("<4>{PROGRAM}: logger already initialized: {error}");
    }
}

/// Point fd 2 at `path` so this process and every child log there.
pub fn redirect_stderr(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    if file.as_raw_fd() == nix::libc::STDERR_FILENO {
        // fd 2 was closed and the log file took its place.
        let _ = file.into_raw_fd();
        return Ok(());
    }

    dup2_stderr(&file).with_context(|| format!("Failed to redirect stderr to {}", path.display()))
}
