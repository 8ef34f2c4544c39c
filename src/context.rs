use crate::error::Unauthorized;
use nix::unistd::{Uid, geteuid, getuid};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrivilegeLevel {
    Root,
    Setuid,
    Unprivileged,
}

/// Real and effective identity of the running daemon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    ruid: Uid,
    euid: Uid,
}

impl ProcessContext {
    pub fn current() -> Self {
        Self::new(getuid(), geteuid())
    }

    pub fn new(ruid: Uid, euid: Uid) -> Self {
        Self { ruid, euid }
    }

    #[inline]
    pub fn root(&self) -> bool {
        self.euid.is_root()
    }

    pub fn privilege_level(&self) -> PrivilegeLevel {
        match (self.ruid.is_root(), self.euid.is_root()) {
            (_, false) => PrivilegeLevel::Unprivileged,
            (true, true) => PrivilegeLevel::Root,
            (false, true) => PrivilegeLevel::Setuid,
        }
    }

    /// Only an effective uid of root may run the bootstrap.
    pub fn require_root(&self) -> Result<PrivilegeLevel, Unauthorized> {
        if !self.root() {
            return Err(Unauthorized {
                ruid: self.ruid,
                euid: self.euid,
            });
        }

        Ok(self.privilege_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_levels() {
        let root = ProcessContext::new(Uid::from_raw(0), Uid::from_raw(0));
        let setuid = ProcessContext::new(Uid::from_raw(1000), Uid::from_raw(0));
        let user = ProcessContext::new(Uid::from_raw(1000), Uid::from_raw(1000));
        let dropped = ProcessContext::new(Uid::from_raw(0), Uid::from_raw(1000));

        assert_eq!(root.privilege_level(), PrivilegeLevel::Root);
        assert_eq!(setuid.privilege_level(), PrivilegeLevel::Setuid);
        assert_eq!(user.privilege_level(), PrivilegeLevel::Unprivileged);
        assert_eq!(dropped.privilege_level(), PrivilegeLevel::Unprivileged);
    }

    #[test]
    fn test_require_root() {
        let setuid = ProcessContext::new(Uid::from_raw(1000), Uid::from_raw(0));
        assert_eq!(setuid.require_root().ok(), Some(PrivilegeLevel::Setuid));

        let user = ProcessContext::new(Uid::from_raw(1000), Uid::from_raw(1000));
        let error = user.require_root().unwrap_err();
        assert_eq!(error.euid, Uid::from_raw(1000));
    }
}
