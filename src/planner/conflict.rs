use serde::Serialize;

use crate::predict::Pass;

/// A candidate that lost the receiver to an overlapping, higher ranked pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedPass {
    pub pass: Pass,
    pub beaten_by: Pass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Conflict free, ordered by AOS.
    pub kept: Vec<Pass>,
    pub dropped: Vec<DroppedPass>,
}

/// Resolve receiver conflicts between candidate passes of all satellites.
///
/// A pass survives iff no overlapping candidate outranks it (higher peak
/// elevation, ties going to the earlier AOS). Losers are dropped whole, never
/// truncated or shifted.
pub fn resolve_conflicts(mut candidates: Vec<Pass>) -> Resolution {
    candidates.sort_by(|a, b| a.aos.cmp(&b.aos).then_with(|| a.satellite.cmp(&b.satellite)));

    let mut resolution = Resolution::default();
    for pass in &candidates {
        // Two ranges [a, b] and [c, d] overlap if a < d && c < b
        let winner = candidates
            .iter()
            .filter(|other| other.overlaps(pass) && other.outranks(pass))
            .fold(None::<&Pass>, |best, other| match best {
                Some(b) if b.outranks(other) => Some(b),
                _ => Some(other),
            });

        match winner {
            Some(winner) => resolution.dropped.push(DroppedPass {
                pass: pass.clone(),
                beaten_by: winner.clone(),
            }),
            None => resolution.kept.push(pass.clone()),
        }
    }

    resolution
}
