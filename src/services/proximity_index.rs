//! Distance ranking of establishments around an origin

use crate::domain::geo::distance_m;
use crate::domain::types::{Coordinates, EstablishmentCandidate, RankedCandidate};

/// Rank candidates by ascending haversine distance from `origin`.
///
/// Equal distances are ordered by candidate id so the output is fully
/// deterministic. Returns the complete ordering; truncation is up to callers.
pub fn rank<I>(origin: Coordinates, candidates: I) -> Vec<RankedCandidate>
where
    I: IntoIterator<Item = EstablishmentCandidate>,
{
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let distance_meters = distance_m(origin, candidate.coordinates());
            RankedCandidate { candidate, distance_meters }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_meters
            .total_cmp(&b.distance_meters)
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    });
    ranked
}

/// Rank and keep the `n` closest
pub fn top_n<I>(origin: Coordinates, candidates: I, n: usize) -> Vec<RankedCandidate>
where
    I: IntoIterator<Item = EstablishmentCandidate>,
{
    let mut ranked = rank(origin, candidates);
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: Coordinates = Coordinates::new(38.7169, -9.1393);

    fn candidate(id: &str, lat: f64, lon: f64) -> EstablishmentCandidate {
        EstablishmentCandidate::new(id, format!("Establishment {}", id), lat, lon)
    }

    fn sample() -> Vec<EstablishmentCandidate> {
        vec![
            candidate("far", 38.7300, -9.1500),
            candidate("near", 38.7170, -9.1393),
            candidate("mid", 38.7200, -9.1400),
            candidate("b-tie", 38.7169, -9.1383),
            candidate("a-tie", 38.7169, -9.1383),
        ]
    }

    #[test]
    fn test_empty_input() {
        assert!(rank(ORIGIN, Vec::new()).is_empty());
    }

    #[test]
    fn test_ascending_order() {
        let ranked = rank(ORIGIN, sample());
        assert_eq!(ranked.len(), 5);
        for pair in ranked.windows(2) {
            assert!(pair[0].distance_meters <= pair[1].distance_meters);
        }
        assert_eq!(ranked[0].candidate.id, "near");
        assert_eq!(ranked[4].candidate.id, "far");
    }

    #[test]
    fn test_ties_broken_by_id() {
        let ranked = rank(ORIGIN, sample());
        let ids: Vec<&str> = ranked.iter().map(|r| r.candidate.id.as_str()).collect();
        let a = ids.iter().position(|id| *id == "a-tie").unwrap();
        let b = ids.iter().position(|id| *id == "b-tie").unwrap();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_idempotent_regardless_of_input_order() {
        let first = rank(ORIGIN, sample());
        let mut reversed = sample();
        reversed.reverse();
        let second = rank(ORIGIN, reversed);
        assert_eq!(first, second);
        assert_eq!(rank(ORIGIN, sample()), first);
    }

    #[test]
    fn test_top_n_truncates() {
        let top = top_n(ORIGIN, sample(), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].candidate.id, "near");

        assert_eq!(top_n(ORIGIN, sample(), 100).len(), 5);
    }
}
