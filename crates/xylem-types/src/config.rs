//! Per-resource configuration consumed by the write transaction.

/// How subtree hashes are maintained for a resource.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HashKind {
    /// No hash maintenance at all.
    None,
    /// Incremental rolling hash; only nodes on the ancestor axis are touched.
    #[default]
    Rolling,
    /// Recomputed hash; the changed node and its ancestors are rebuilt from
    /// their children on every update.
    Postorder,
}

/// When hash and descendant-count maintenance must be exact.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Consistency {
    /// Maintenance runs on every edit.
    #[default]
    Strict,
    /// Maintenance is deferred while the uber page is still bootstrap and
    /// repaired by a post-order pass at commit.
    Eventual,
}

/// Resource configuration shared by the session and its transactions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceConfig {
    /// Hash maintenance strategy.
    pub hash_kind: HashKind,
    /// Maintenance timing.
    pub consistency: Consistency,
    /// Whether long text values are deflated on write.
    pub compression: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ResourceConfig::default();
        assert_eq!(cfg.hash_kind, HashKind::Rolling);
        assert_eq!(cfg.consistency, Consistency::Strict);
        assert!(!cfg.compression);
    }
}
