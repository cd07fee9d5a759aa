use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A permission tag gating which operations an agent may perform.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// May decide to split a task and coordinate its sub-tasks.
    Orchestrate,
    /// May create child agents.
    Spawn,
    /// May perform leaf work.
    Execute,
    /// May run validation checks on inputs and results.
    Validate,
    /// May merge sub-results into one parent result.
    Synthesize,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 5] = [
        Capability::Orchestrate,
        Capability::Spawn,
        Capability::Execute,
        Capability::Validate,
        Capability::Synthesize,
    ];

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Orchestrate => "orchestrate",
            Capability::Spawn => "spawn",
            Capability::Execute => "execute",
            Capability::Validate => "validate",
            Capability::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of capabilities held by an agent or required by a task.
///
/// Ordered so that error messages and snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding every capability.
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Add a capability.
    pub fn grant(&mut self, cap: Capability) {
        self.capabilities.insert(cap);
    }

    /// Builder form of [`CapabilitySet::grant`].
    pub fn with(mut self, cap: Capability) -> Self {
        self.grant(cap);
        self
    }

    /// Remove a capability.
    pub fn revoke(&mut self, cap: Capability) {
        self.capabilities.remove(&cap);
    }

    /// Whether the capability is present.
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Whether every capability of `required` is present in `self`.
    pub fn covers(&self, required: &CapabilitySet) -> bool {
        required.capabilities.is_subset(&self.capabilities)
    }

    /// Capabilities of `required` that `self` lacks.
    pub fn missing(&self, required: &CapabilitySet) -> CapabilitySet {
        required
            .capabilities
            .difference(&self.capabilities)
            .copied()
            .collect()
    }

    /// Union of two sets.
    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        self.capabilities
            .union(&other.capabilities)
            .copied()
            .collect()
    }

    /// Number of capabilities held.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Iterate in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(caps: [Capability; N]) -> Self {
        caps.into_iter().collect()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.capabilities.iter().map(Capability::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let mut caps = CapabilitySet::new();
        assert!(caps.is_empty());

        caps.grant(Capability::Execute);
        assert!(caps.has(Capability::Execute));
        assert!(!caps.has(Capability::Spawn));

        caps.revoke(Capability::Execute);
        assert!(caps.is_empty());
    }

    #[test]
    fn test_covers_and_missing() {
        let held = CapabilitySet::from([Capability::Execute, Capability::Validate]);
        let required = CapabilitySet::from([Capability::Execute, Capability::Spawn]);

        assert!(!held.covers(&required));
        assert_eq!(held.missing(&required), CapabilitySet::from([Capability::Spawn]));
        assert!(CapabilitySet::all().covers(&required));
        assert!(held.covers(&CapabilitySet::new()));
    }

    #[test]
    fn test_display_is_ordered() {
        let caps = CapabilitySet::from([Capability::Synthesize, Capability::Orchestrate]);
        assert_eq!(caps.to_string(), "[orchestrate, synthesize]");
    }

    #[test]
    fn test_serde_is_transparent() {
        let caps = CapabilitySet::from([Capability::Spawn, Capability::Execute]);
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, r#"["spawn","execute"]"#);
        let parsed: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, caps);
    }
}
