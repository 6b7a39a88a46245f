// src/error.rs
//
// =============================================================================
// SPORELAB: ERROR TAXONOMY (v 0.1 )
// =============================================================================
//
// Hard invariant violations only. Everything else in the system recovers
// locally and reports through return values (None / soft result structs);
// these variants abort the in-flight operation and surface to the caller,
// whose remedy is `clear_all` or restoring a previous group.

use thiserror::Error;

use crate::ids::SporeId;

#[derive(Debug, Error)]
pub enum PlannerError {
    /// Sorted grandchild pair drawn from a single parent. A correctness
    /// property of the planner; never smoothed over.
    #[error("pairing invariant violated: pair {pair} has both grandchildren from parent {parent}")]
    PairingInvariant { pair: usize, parent: usize },

    /// The tree finished sorting with fewer grandchildren than the pairing
    /// step requires.
    #[error("pairing invariant violated: {found} grandchildren, need {needed}")]
    PairingUnderfull { found: usize, needed: usize },

    /// The pair optimizer was handed or produced a vector of the wrong
    /// dimensionality (the contract is 4 + 8 = 12).
    #[error("dt vector has dimension {got}, expected 12")]
    DtVectorDimension { got: usize },

    /// Buffer materialization asked to map a ghost that was never
    /// registered during the merge pass.
    #[error("ghost spore {0} has no buffer mapping")]
    UnmappedGhost(String),

    /// An edge referenced a spore id that is not present in the graph.
    #[error("spore {0} is not registered in the graph")]
    MissingSpore(SporeId),

    /// Tree operations called out of order (children before root, pairing
    /// before grandchildren, and so on).
    #[error("tree stage out of order: {0}")]
    TreeStage(&'static str),
}
