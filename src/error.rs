use nix::{errno::Errno, unistd::Uid};
use std::io;
use thiserror::Error;

/// Exit code reserved for a caller that is not root.
pub const UNAUTHORIZED_EXIT_CODE: u8 = 1;

/// Exit code used when a failure carries no OS error.
const FALLBACK_EXIT_CODE: u8 = Errno::EINVAL as u8;

/// The daemon was started without an effective uid of root.
#[derive(Debug, Error)]
#[error("must be run as root (uid={ruid}, euid={euid})")]
pub struct Unauthorized {
    pub ruid: Uid,
    pub euid: Uid,
}

/// Map a failure of the bootstrap onto the process exit code.
///
/// Authorization failures exit with `1`. Every other failure exits with the
/// first OS error found in the chain.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    if error.downcast_ref::<Unauthorized>().is_some() {
        return UNAUTHORIZED_EXIT_CODE;
    }

    errno(error)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(FALLBACK_EXIT_CODE)
}

/// First OS error number found in the error chain.
pub fn errno(error: &anyhow::Error) -> Option<i32> {
    error.chain().find_map(|cause| {
        if let Some(errno) = cause.downcast_ref::<Errno>() {
            return Some(*errno as i32);
        }

        cause
            .downcast_ref::<io::Error>()
            .and_then(io::Error::raw_os_error)
    })
}

/// Convert an error into an `io::Error` that keeps its OS error number.
pub fn into_io_error(error: anyhow::Error) -> io::Error {
    match errno(&error) {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::other(format!("{error:#}")),
    }
}
