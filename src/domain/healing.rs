//! Quarantine, probation and peer-consensus records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reader's enforced non-serving period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub quarantine_id: Uuid,
    pub reader_id: String,
    pub entered_at: i64,
    /// 1..=3; escalates on failed recovery attempts.
    pub severity: u8,
    pub trigger_violation: String,
    pub trust_score_at_entry: i32,
    pub cleared_at: Option<i64>,
    /// Set once probation challenges have been issued.
    pub probation_started_at: Option<i64>,
    /// Set once all challenges passed and peer voting opened.
    pub consensus_opened_at: Option<i64>,
}

impl QuarantineRecord {
    pub fn is_active(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Kinds of probation challenge a quarantined reader must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeKind {
    /// Process an admin-whitelisted tag hash before the challenge expires.
    KnownTag,
    /// Echo the server nonce within the configured response window.
    Timing,
    /// Return SHA-256 of an admin-supplied byte string.
    HashVerify,
}

/// Terminal state of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeOutcome {
    Passed,
    Failed,
    Expired,
}

/// One issued probation challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbationChallenge {
    pub challenge_id: Uuid,
    pub quarantine_id: Uuid,
    pub reader_id: String,
    pub kind: ChallengeKind,
    /// KNOWN_TAG: the whitelisted tag hash the reader must process.
    pub expected_tag_hash: Option<String>,
    /// TIMING / HASH_VERIFY: server-chosen nonce or payload (hex).
    pub challenge_data: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub attempts_remaining: u32,
    pub outcome: Option<ChallengeOutcome>,
}

impl ProbationChallenge {
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

/// A peer's vote on restoring a quarantined reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Approve,
    Reject,
}

/// Unique on `(subject, voter)`; a re-cast vote within the voting window
/// overwrites the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerVote {
    pub subject_reader_id: String,
    pub voter_reader_id: String,
    pub vote: Vote,
    pub cast_at: i64,
}

/// Elevated fraud sensitivity for a tag recently seen by a quarantined
/// reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSuspicion {
    pub tag_hash: String,
    pub source_reader_id: String,
    pub multiplier: f64,
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantine_active_until_cleared() {
        let mut q = QuarantineRecord {
            quarantine_id: Uuid::new_v4(),
            reader_id: "R1".to_string(),
            entered_at: 100,
            severity: 1,
            trigger_violation: "REPLAY".to_string(),
            trust_score_at_entry: 20,
            cleared_at: None,
            probation_started_at: None,
            consensus_opened_at: None,
        };
        assert!(q.is_active());
        q.cleared_at = Some(500);
        assert!(!q.is_active());
    }

    #[test]
    fn challenge_open_until_resolved() {
        let mut c = ProbationChallenge {
            challenge_id: Uuid::new_v4(),
            quarantine_id: Uuid::new_v4(),
            reader_id: "R1".to_string(),
            kind: ChallengeKind::Timing,
            expected_tag_hash: None,
            challenge_data: Some("abcd".to_string()),
            issued_at: 0,
            expires_at: 600,
            attempts_remaining: 2,
            outcome: None,
        };
        assert!(c.is_open());
        c.outcome = Some(ChallengeOutcome::Passed);
        assert!(!c.is_open());
    }
}
