//! Nearest-neighbor identity matching over a roster snapshot.

use crate::types::{Embedding, Identity, RosterSnapshot};

/// Default maximum embedding distance accepted as "same person".
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Result of matching a probe embedding against the roster.
#[derive(Debug, Clone)]
pub enum Match<'a> {
    /// Best roster member within tolerance, with its distance.
    Known { identity: &'a Identity, distance: f32 },
    /// Empty roster, or nobody close enough.
    Unknown,
}

impl Match<'_> {
    pub fn is_known(&self) -> bool {
        matches!(self, Match::Known { .. })
    }
}

/// Find the roster identity nearest to `probe`, if within `tolerance`.
///
/// Pure function of its inputs: every roster member is compared, the global
/// minimum distance wins, and ties are broken by the lowest roster index
/// (strict `<` keeps the first-encountered minimum). An empty roster always
/// yields `Unknown`.
pub fn best_match<'a>(
    probe: &Embedding,
    roster: &'a RosterSnapshot,
    tolerance: f32,
) -> Match<'a> {
    let mut best: Option<(&Identity, f32)> = None;

    for identity in roster.iter() {
        let distance = probe.euclidean_distance(&identity.embedding);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((identity, distance)),
        }
    }

    match best {
        Some((identity, distance)) if distance <= tolerance => {
            Match::Known { identity, distance }
        }
        _ => Match::Unknown,
    }
}

/// Registration-time duplicate guard: the first roster member within
/// `tolerance` of `probe`, if any.
///
/// Used to reject enrolling a face that the matcher would already recognize
/// as an existing person.
pub fn duplicate_of<'a>(
    probe: &Embedding,
    roster: &'a RosterSnapshot,
    tolerance: f32,
) -> Option<&'a Identity> {
    match best_match(probe, roster, tolerance) {
        Match::Known { identity, .. } => Some(identity),
        Match::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: i64, name: &str, values: Vec<f32>) -> Identity {
        Identity {
            id,
            display_name: name.to_string(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_empty_roster_is_unknown() {
        let roster = RosterSnapshot::default();
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert!(!best_match(&probe, &roster, DEFAULT_TOLERANCE).is_known());
    }

    #[test]
    fn test_within_tolerance_matches() {
        // Alice at distance 0.3 from the probe, tolerance 0.5.
        let roster = RosterSnapshot::new(vec![identity(1, "Alice", vec![0.3, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        match best_match(&probe, &roster, 0.5) {
            Match::Known { identity, distance } => {
                assert_eq!(identity.display_name, "Alice");
                assert!((distance - 0.3).abs() < 1e-6);
            }
            Match::Unknown => panic!("expected a match at distance 0.3"),
        }
    }

    #[test]
    fn test_beyond_tolerance_is_unknown() {
        // Distance 0.7 > tolerance 0.5.
        let roster = RosterSnapshot::new(vec![identity(1, "Alice", vec![0.7, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(!best_match(&probe, &roster, 0.5).is_known());
    }

    #[test]
    fn test_global_minimum_wins() {
        let roster = RosterSnapshot::new(vec![
            identity(1, "far", vec![0.4, 0.0]),
            identity(2, "near", vec![0.1, 0.0]),
            identity(3, "farther", vec![0.45, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        match best_match(&probe, &roster, 0.5) {
            Match::Known { identity, .. } => assert_eq!(identity.id, 2),
            Match::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn test_tie_break_lowest_index() {
        // Two members equidistant from the probe: the first in roster order wins.
        let roster = RosterSnapshot::new(vec![
            identity(7, "first", vec![0.2, 0.0]),
            identity(3, "second", vec![-0.2, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        match best_match(&probe, &roster, 0.5) {
            Match::Known { identity, .. } => assert_eq!(identity.id, 7),
            Match::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn test_distance_exactly_at_tolerance_matches() {
        let roster = RosterSnapshot::new(vec![identity(1, "edge", vec![0.5, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(best_match(&probe, &roster, 0.5).is_known());
    }

    #[test]
    fn test_duplicate_guard_rejects_within_tolerance() {
        let roster = RosterSnapshot::new(vec![identity(1, "Alice", vec![0.3, 0.0])]);
        let new_face = Embedding::new(vec![0.0, 0.0]);
        let dup = duplicate_of(&new_face, &roster, 0.5);
        assert_eq!(dup.map(|i| i.id), Some(1));
    }

    #[test]
    fn test_duplicate_guard_accepts_beyond_tolerance() {
        let roster = RosterSnapshot::new(vec![identity(1, "Alice", vec![0.9, 0.0])]);
        let new_face = Embedding::new(vec![0.0, 0.0]);
        assert!(duplicate_of(&new_face, &roster, 0.5).is_none());
    }
}
