use crate::{config::Layout, identity::Identity};
use anyhow::{Context, Result};
use nix::errno::Errno;
use std::{collections::HashSet, path::Path};

const PATH: &str = "/usr/sbin:/usr/bin:/sbin:/bin:/usr/games";
const WAYLAND_DISPLAY: &str = "wayland-0";
const DISPLAY: &str = ":0";
const XCURSOR_PATH: &str = "/usr/share/icons";
const XCURSOR_THEME: &str = "whiteglass";
const XCURSOR_SIZE: &str = "16";
const DEFAULT_APP_ICON: &str = "/usr/share/icons/wsl/linux.png";

/// Ordered set of variables the compositor inherits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvTable {
    vars: Vec<(String, String)>,
}

impl EnvTable {
    pub fn for_identity(layout: &Layout, identity: &Identity) -> Result<Self> {
        let entries = [
            ("HOME", utf8_path(&identity.home)?.to_owned()),
            ("USER", identity.name.clone()),
            ("LOGNAME", identity.name.clone()),
            ("SHELL", utf8_path(&identity.shell)?.to_owned()),
            ("PATH", PATH.to_owned()),
            ("XDG_RUNTIME_DIR", utf8_path(&layout.runtime_dir)?.to_owned()),
            ("WAYLAND_DISPLAY", WAYLAND_DISPLAY.to_owned()),
            ("DISPLAY", DISPLAY.to_owned()),
            ("XCURSOR_PATH", XCURSOR_PATH.to_owned()),
            ("XCURSOR_THEME", XCURSOR_THEME.to_owned()),
            ("XCURSOR_SIZE", XCURSOR_SIZE.to_owned()),
            ("WSL2_DEFAULT_APP_ICON", DEFAULT_APP_ICON.to_owned()),
            ("WSL2_DEFAULT_APP_OVERLAY_ICON", DEFAULT_APP_ICON.to_owned()),
            ("WESTON_DISABLE_ABSTRACT_FD", "1".to_owned()),
        ];

        Self::from_pairs(entries.map(|(name, value)| (name.to_owned(), value)))
    }

    /// Build a table, rejecting duplicate or malformed names.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut seen = HashSet::new();
        let mut vars = Vec::new();

        for (name, value) in pairs {
            validate(&name, &value)?;

            if !seen.insert(name.clone()) {
                return Err(Errno::EINVAL)
                    .with_context(|| format!("Duplicate environment variable {name}"));
            }

            vars.push((name, value));
        }

        Ok(Self { vars })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }
}

/// Paths end up in the environment and on the command line verbatim, so a
/// lossy conversion would hand the compositor a different path.
pub fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or(Errno::EINVAL)
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

/// `std::env::set_var` panics on these inputs instead of failing.
pub fn validate(name: &str, value: &str) -> Result<()> {
    if name.is_empty() || name.contains(['=', '\0']) {
        return Err(Errno::EINVAL)
            .with_context(|| format!("Invalid environment variable name {name:?}"));
    }

    if value.contains('\0') {
        return Err(Errno::EINVAL)
            .with_context(|| format!("Invalid value for environment variable {name}"));
    }

    Ok(())
}

/// Set a single variable on the current process, overwriting any previous value.
pub fn set_var(name: &str, value: &str) -> Result<()> {
    validate(name, value)?;

    // SAFETY: The bootstrap is single-threaded and the environment is written
    // before any child is spawned.
    unsafe { std::env::set_var(name, value) };
    Ok(())
}
