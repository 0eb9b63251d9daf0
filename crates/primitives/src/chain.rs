use alloy_primitives::U256;

/// Consensus-relevant chain configuration.
///
/// Only the knobs that drive the Proof-of-Work to Proof-of-Stake transition
/// are modeled here; fork schedules live with the state transition, which is
/// outside of this pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainConfig {
    /// The cumulative difficulty threshold beyond which the chain operates in
    /// PoS mode. `None` for chains that never merge.
    pub terminal_total_difficulty: Option<U256>,
    /// Set when the terminal total difficulty is known to have been passed,
    /// which skips the database transition lookup.
    pub terminal_total_difficulty_passed: bool,
}

impl ChainConfig {
    /// Configuration for a chain that launched as, or already transitioned to,
    /// Proof-of-Stake.
    pub fn pos() -> Self {
        Self { terminal_total_difficulty: Some(U256::ZERO), terminal_total_difficulty_passed: true }
    }
}
