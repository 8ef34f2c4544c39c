use anyhow::{Context, Result};
use nix::unistd::{Gid, Uid, chown};
use std::{
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

/// Directory that must exist with an exact mode (and owner) before startup continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirTarget {
    pub path: PathBuf,
    pub mode: u32,
    pub owner: Option<(Uid, Gid)>,
}

impl DirTarget {
    pub const WORLD_WRITABLE: u32 = 0o777;
    pub const OWNER_ONLY: u32 = 0o700;

    pub fn shared<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            mode: Self::WORLD_WRITABLE,
            owner: None,
        }
    }

    pub fn private<P: Into<PathBuf>>(path: P, uid: Uid, gid: Gid) -> Self {
        Self {
            path: path.into(),
            mode: Self::OWNER_ONLY,
            owner: Some((uid, gid)),
        }
    }
}

/// Create `target` (and any missing parents), then re-assert its mode and owner.
///
/// An existing directory is fine. Mode and owner are applied on every call,
/// so a second run converges to the same state.
pub fn prepare(target: &DirTarget) -> Result<()> {
    let path = target.path.as_path();

    create_directory_recursive(path)?;

    fs::set_permissions(path, Permissions::from_mode(target.mode))
        .with_context(|| format!("Failed to chmod {} to {:o}", path.display(), target.mode))?;

    if let Some((uid, gid)) = target.owner {
        chown(path, Some(uid), Some(gid))
            .with_context(|| format!("Failed to chown {} to {uid}:{gid}", path.display()))?;
    }

    Ok(())
}

fn create_directory_recursive(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))
}
