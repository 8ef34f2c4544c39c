use anyhow::{Context, Result, bail};
use caps::CapsHashSet;

pub(crate) use caps::{CapSet, Capability};

/// Capabilities the compositor keeps; it needs them to `setns` into the
/// mount namespace of the user distribution. Everything else is dropped.
pub const LAUNCH_CAPABILITIES: [Capability; 3] = [
    Capability::CAP_SYS_ADMIN,
    Capability::CAP_SYS_CHROOT,
    Capability::CAP_SYS_PTRACE,
];

pub fn launch_capabilities() -> CapsHashSet {
    LAUNCH_CAPABILITIES.into_iter().collect()
}

/// Reduces the calling thread to a fixed set of retained capabilities.
///
/// Meant to run in a freshly forked child, split around the uid switch:
/// [`restrict_bounding_set`](Self::restrict_bounding_set) and
/// [`keep_across_setuid`](Self::keep_across_setuid) while still root,
/// [`apply_retained`](Self::apply_retained) afterwards.
#[derive(Debug, Clone)]
pub(crate) struct CapabilityManager {
    retained: CapsHashSet,
}

impl CapabilityManager {
    const PROCESS_SETS: [CapSet; 3] = [CapSet::Permitted, CapSet::Effective, CapSet::Inheritable];

    pub fn new(retained: CapsHashSet) -> Self {
        Self { retained }
    }

    /// Read every capability set of the calling thread.
    pub fn current() -> Result<CapabilitySnapshot> {
        Ok(CapabilitySnapshot {
            effective: Self::read_capability_set(CapSet::Effective)?,
            permitted: Self::read_capability_set(CapSet::Permitted)?,
            inheritable: Self::read_capability_set(CapSet::Inheritable)?,
            ambient: Self::read_capability_set(CapSet::Ambient)?,
            bounding: Self::read_capability_set(CapSet::Bounding)?,
        })
    }

    /// Drop every supported capability outside the retained set from the bounding set.
    pub fn restrict_bounding_set(&self) -> Result<()> {
        let bounding = Self::read_capability_set(CapSet::Bounding)?;

        for capability in caps::runtime::thread_all_supported() {
            if bounding.contains(&capability) && !self.retained.contains(&capability) {
                self.drop_bounding_capability(capability)?;
            }
        }

        Ok(())
    }

    /// Keep the permitted set when the uid changes from root.
    pub fn keep_across_setuid(&self) -> Result<()> {
        caps::securebits::set_keepcaps(true).context("Failed to set SECBIT_KEEP_CAPS")
    }

    /// Make the retained set exactly the permitted, effective, inheritable
    /// and ambient sets, so it survives `execve` of an unprivileged binary.
    pub fn apply_retained(&self) -> Result<()> {
        for cap_set in Self::PROCESS_SETS {
            self.set_capability_set(cap_set, &self.retained)?;
        }

        caps::clear(None, CapSet::Ambient).context("Failed to clear ambient capabilities")?;

        for capability in &self.retained {
            caps::raise(None, CapSet::Ambient, *capability)
                .with_context(|| format!("Failed to raise ambient capability: {capability}"))?;
        }

        Ok(())
    }

    /// Fail unless the thread holds exactly the retained capabilities.
    pub fn validate_retained(&self) -> Result<()> {
        let snapshot = Self::current()?;

        if !snapshot.holds_exactly(&self.retained) {
            bail!(
                "retained capabilities not in effect (required [{}], excess [{}]): {snapshot}",
                describe(&self.retained),
                describe(&snapshot.excess(&self.retained))
            );
        }

        Ok(())
    }

    fn set_capability_set(&self, cap_set: CapSet, capabilities: &CapsHashSet) -> Result<()> {
        caps::set(None, cap_set, capabilities)
            .with_context(|| format!("Failed to set {cap_set:?} capability set"))
    }

    fn read_capability_set(cap_set: CapSet) -> Result<CapsHashSet> {
        caps::read(None, cap_set).with_context(|| format!("Failed to read {cap_set:?} capability set"))
    }

    fn drop_bounding_capability(&self, capability: Capability) -> Result<()> {
        caps::drop(None, CapSet::Bounding, capability)
            .with_context(|| format!("Failed to drop bounding capability: {capability}"))
    }
}

/// Capability sets of a thread at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub effective: CapsHashSet,
    pub permitted: CapsHashSet,
    pub inheritable: CapsHashSet,
    pub ambient: CapsHashSet,
    pub bounding: CapsHashSet,
}

impl CapabilitySnapshot {
    /// Whether the sets that survive `execve` of an unprivileged binary are
    /// all exactly `retained`.
    pub fn holds_exactly(&self, retained: &CapsHashSet) -> bool {
        [
            &self.effective,
            &self.permitted,
            &self.inheritable,
            &self.ambient,
        ]
        .into_iter()
        .all(|set| set == retained)
    }

    /// Capabilities the thread could still regain beyond `retained`.
    pub fn excess(&self, retained: &CapsHashSet) -> CapsHashSet {
        self.permitted
            .union(&self.ambient)
            .filter(|capability| !retained.contains(capability))
            .copied()
            .collect()
    }
}

impl std::fmt::Display for CapabilitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "effective=[{}] permitted=[{}] inheritable=[{}] ambient=[{}] bounding={}",
            describe(&self.effective),
            describe(&self.permitted),
            describe(&self.inheritable),
            describe(&self.ambient),
            self.bounding.len()
        )
    }
}

/// Render a capability set in a stable order.
pub fn describe(capabilities: &CapsHashSet) -> String {
    let mut names: Vec<_> = capabilities.iter().map(ToString::to_string).collect();
    names.sort();
    names.join(",")
}
