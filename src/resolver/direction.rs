//! Direction disambiguation strategies.
//!
//! A registration candidate stores a matrix between two spaces but files in
//! the wild disagree about which way it points. Disambiguation runs as an
//! ordered chain of independently-testable strategies; the first one that
//! can make a determination wins:
//!
//! 1. [`FrameOfReferenceMatch`] — the series have different Frame of
//!    Reference UIDs and the candidate records source/target frames.
//! 2. [`SeriesUidMatch`] — the series share one Frame of Reference (common
//!    for CT–CT pairs that still need a registration), so frames cannot
//!    discriminate; match the candidate's referenced Series Instance UIDs
//!    instead.
//! 3. [`AssumeStoredDirection`] — the candidate declares no direction
//!    context at all; trust the stored orientation.

use crate::registration::RegistrationCandidate;

/// Identifying attributes of one series in a fusion pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesIdentity {
    pub id: String,
    pub frame_of_reference: Option<String>,
    pub series_instance_uid: Option<String>,
}

/// The (primary, secondary) pair under resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PairContext {
    pub primary: SeriesIdentity,
    pub secondary: SeriesIdentity,
}

impl PairContext {
    /// Whether both series carry the same Frame of Reference UID.
    pub fn shared_frame(&self) -> bool {
        match (
            &self.primary.frame_of_reference,
            &self.secondary.frame_of_reference,
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// How a candidate matrix maps secondary space into primary space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The stored matrix already maps secondary → primary
    AsIs,
    /// The stored matrix maps primary → secondary and must be inverted
    Inverted,
}

/// One link in the disambiguation chain.
pub trait DirectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Determine the candidate's direction for this pair, or `None` when
    /// this strategy cannot tell.
    fn orient(&self, candidate: &RegistrationCandidate, pair: &PairContext) -> Option<Direction>;
}

/// Match candidate source/target Frame of Reference UIDs against the pair.
pub struct FrameOfReferenceMatch;

impl DirectionStrategy for FrameOfReferenceMatch {
    fn name(&self) -> &'static str {
        "frame-of-reference"
    }

    fn orient(&self, candidate: &RegistrationCandidate, pair: &PairContext) -> Option<Direction> {
        if pair.shared_frame() {
            return None;
        }
        let primary = pair.primary.frame_of_reference.as_deref()?;
        let secondary = pair.secondary.frame_of_reference.as_deref()?;
        let source = candidate.source_frame_of_reference.as_deref()?;
        let target = candidate.target_frame_of_reference.as_deref()?;

        if source == secondary && target == primary {
            Some(Direction::AsIs)
        } else if source == primary && target == secondary {
            Some(Direction::Inverted)
        } else {
            None
        }
    }
}

/// Match the candidate's referenced Series Instance UIDs when both series
/// share one Frame of Reference.
pub struct SeriesUidMatch;

impl DirectionStrategy for SeriesUidMatch {
    fn name(&self) -> &'static str {
        "series-uid"
    }

    fn orient(&self, candidate: &RegistrationCandidate, pair: &PairContext) -> Option<Direction> {
        if !pair.shared_frame() {
            return None;
        }
        let references_primary = contains(&candidate.referenced_series, &pair.primary);
        let references_secondary = contains(&candidate.referenced_series, &pair.secondary);

        match (references_secondary, references_primary) {
            (true, false) => Some(Direction::AsIs),
            (false, true) => Some(Direction::Inverted),
            // References to both or neither cannot discriminate
            _ => None,
        }
    }
}

/// Trust the stored orientation when the candidate declares no direction
/// context whatsoever. Candidates that *do* declare context which failed to
/// match the pair stay unresolved — they likely belong to another pair.
pub struct AssumeStoredDirection;

impl DirectionStrategy for AssumeStoredDirection {
    fn name(&self) -> &'static str {
        "stored-direction"
    }

    fn orient(&self, candidate: &RegistrationCandidate, _pair: &PairContext) -> Option<Direction> {
        let declares_context = candidate.source_frame_of_reference.is_some()
            || !candidate.referenced_series.is_empty();
        (!declares_context).then_some(Direction::AsIs)
    }
}

/// The default chain, in precedence order.
pub fn default_chain() -> Vec<Box<dyn DirectionStrategy>> {
    vec![
        Box::new(FrameOfReferenceMatch),
        Box::new(SeriesUidMatch),
        Box::new(AssumeStoredDirection),
    ]
}

/// Run the chain; first determination wins.
pub fn orient_candidate(
    chain: &[Box<dyn DirectionStrategy>],
    candidate: &RegistrationCandidate,
    pair: &PairContext,
) -> Option<(Direction, &'static str)> {
    chain
        .iter()
        .find_map(|strategy| Some((strategy.orient(candidate, pair)?, strategy.name())))
}

fn contains(series: &[String], identity: &SeriesIdentity) -> bool {
    identity
        .series_instance_uid
        .as_deref()
        .is_some_and(|uid| series.iter().any(|s| s == uid))
}
