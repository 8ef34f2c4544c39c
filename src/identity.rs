use anyhow::{Context, Result};
use nix::{
    errno::Errno,
    unistd::{Gid, Uid, User},
};
use std::path::PathBuf;

/// Passwd record of the unprivileged session user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub home: PathBuf,
    pub shell: PathBuf,
    pub uid: Uid,
    pub gid: Gid,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            home: user.dir,
            shell: user.shell,
            uid: user.uid,
            gid: user.gid,
        }
    }
}

pub trait IdentityResolver {
    fn resolve(&self, name: &str) -> Result<Identity>;
}

/// Resolves users through the system passwd database.
#[derive(Debug, Default)]
pub struct PasswdResolver;

impl IdentityResolver for PasswdResolver {
    fn resolve(&self, name: &str) -> Result<Identity> {
        let user = User::from_name(name)
            .with_context(|| format!("Failed to look up user {name:?}"))?
            .ok_or(Errno::ENOENT)
            .with_context(|| format!("User {name:?} does not exist"))?;

        Ok(Identity::from(user))
    }
}
