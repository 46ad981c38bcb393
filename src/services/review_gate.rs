//! Review eligibility: cool-down and proximity rules
//!
//! A user may review an establishment only when both hold:
//! - Time: no earlier review by this user, or the last one is older than the cool-down
//! - Distance: the user is strictly closer than the proximity limit
//!
//! Evaluation is pure; recording the review is the caller's job.

use crate::domain::geo::distance_m;
use crate::domain::types::{Coordinates, ReviewAttempt};
use chrono::{DateTime, Duration, Utc};

/// Outcome of an eligibility check, with the rule that failed
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Allowed,
    /// Time rule failed; `remaining` until the cool-down ends
    CoolingDown { remaining: Duration },
    /// Distance rule failed
    TooFar { distance_meters: f64 },
}

impl Eligibility {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Eligibility::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Eligibility::Allowed => "allowed",
            Eligibility::CoolingDown { .. } => "cooling_down",
            Eligibility::TooFar { .. } => "too_far",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReviewEligibilityGate {
    cooldown: Duration,
    max_distance_m: f64,
}

impl ReviewEligibilityGate {
    pub fn new(cooldown: Duration, max_distance_m: f64) -> Self {
        Self { cooldown, max_distance_m }
    }

    /// Check both rules. The time rule is reported first when both fail.
    pub fn evaluate(
        &self,
        attempt: &ReviewAttempt,
        establishment: Coordinates,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if let Some(prior) = attempt.prior_review_at {
            let elapsed = now - prior;
            if elapsed <= self.cooldown {
                return Eligibility::CoolingDown { remaining: self.cooldown - elapsed };
            }
        }

        let distance_meters = distance_m(attempt.user_position.coordinates(), establishment);
        // NaN on either side must deny
        let within = distance_meters < self.max_distance_m;
        if !within {
            return Eligibility::TooFar { distance_meters };
        }

        Eligibility::Allowed
    }

    pub fn can_review(&self, attempt: &ReviewAttempt, establishment: Coordinates, now: DateTime<Utc>) -> bool {
        self.evaluate(attempt, establishment, now).is_allowed()
    }
}

impl Default for ReviewEligibilityGate {
    fn default() -> Self {
        Self::new(Duration::minutes(30), 50.0)
    }
}
