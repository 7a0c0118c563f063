//! Self-healing lifecycle: quarantine recovery, probation challenges and
//! peer-consensus restoration.
//!
//! QUARANTINED readers earn probation entry through time-based recovery
//! measured from quarantine entry. Probation issues one KNOWN_TAG, one
//! TIMING and one HASH_VERIFY challenge per severity level; passing them all
//! opens a peer vote among active readers. Failure at any stage returns the
//! reader to QUARANTINED with incremented severity (capped at 3).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{generate_nonce, sha256_hex};
use crate::domain::{
    ChallengeKind, ChallengeOutcome, PeerVote, ProbationChallenge, QuarantineRecord, Reader,
    ReaderStatus, Vote, ViolationClass, ViolationRecord,
};
use crate::infra::{
    CardStore, HealingStore, ReaderStore, Result, TollError, ViolationLog,
};
use crate::policy::PolicyHandle;

/// Reader-supplied answer to a probation challenge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// KNOWN_TAG: the tag hash the reader processed.
    pub tag_hash: Option<String>,
    /// TIMING: echo of the server nonce.
    pub nonce: Option<String>,
    /// TIMING: measured response latency.
    pub elapsed_ms: Option<u64>,
    /// HASH_VERIFY: hex SHA-256 of the supplied payload.
    pub digest_hex: Option<String>,
}

/// Outcome of submitting one challenge response.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeResult {
    /// Terminal outcome, or `None` while attempts remain.
    pub outcome: Option<ChallengeOutcome>,
    pub attempts_remaining: u32,
    /// All challenges of the current probation round passed.
    pub all_passed: bool,
    /// Peer voting opened as a result of this submission.
    pub consensus_opened: bool,
}

/// Tally returned when casting a vote.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusStatus {
    pub approvals: usize,
    pub rejections: usize,
    pub eligible: usize,
    pub restored: bool,
}

/// Drives the quarantine → probation → consensus → active lifecycle.
pub struct HealingEngine {
    readers: Arc<dyn ReaderStore>,
    healing: Arc<dyn HealingStore>,
    cards: Arc<dyn CardStore>,
    violations: Arc<dyn ViolationLog>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
}

impl HealingEngine {
    pub fn new(
        readers: Arc<dyn ReaderStore>,
        healing: Arc<dyn HealingStore>,
        cards: Arc<dyn CardStore>,
        violations: Arc<dyn ViolationLog>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            readers,
            healing,
            cards,
            violations,
            policy,
            clock,
        }
    }

    /// Periodic pass over active quarantines: probation entry, challenge
    /// expiry and consensus timeout. Returns how many challenges expired.
    pub async fn maintenance(&self) -> Result<u64> {
        let now = self.clock.now_unix();
        let policy = self.policy.load();
        let mut expired_total = 0u64;

        for quarantine in self.healing.active_quarantines().await? {
            let Some(mut reader) = self.readers.get(&quarantine.reader_id).await? else {
                continue;
            };

            match reader.status {
                ReaderStatus::Quarantined => {
                    // Recovery measured from quarantine entry; the normal
                    // decay path is closed to quarantined readers.
                    let hours = (now - quarantine.entered_at).max(0) as f64 / 3600.0;
                    let recovery = policy
                        .recovery
                        .cap
                        .min(policy.recovery.rate * (1.0 + hours).ln());
                    let effective =
                        ((reader.trust_score as f64 + recovery).min(100.0)).round() as i32;
                    if effective >= policy.thresholds.probation_entry_floor {
                        self.enter_probation(&mut reader, quarantine, effective, now)
                            .await?;
                    }
                }
                ReaderStatus::Probation => {
                    let mut quarantine = quarantine;
                    let challenges = self.open_challenges(&quarantine).await?;
                    let mut failed = false;
                    for mut challenge in challenges {
                        if now > challenge.expires_at {
                            challenge.outcome = Some(ChallengeOutcome::Expired);
                            self.healing.put_challenge(challenge).await?;
                            expired_total += 1;
                            failed = true;
                        }
                    }
                    if failed {
                        self.fail_probation(&mut reader, &mut quarantine, "challenge expired")
                            .await?;
                        continue;
                    }

                    if let Some(opened_at) = quarantine.consensus_opened_at {
                        if now > opened_at + policy.consensus.timeout_secs {
                            self.fail_probation(
                                &mut reader,
                                &mut quarantine,
                                "peer consensus timed out",
                            )
                            .await?;
                            continue;
                        }
                        self.evaluate_consensus(&mut reader, &mut quarantine).await?;
                    } else if self.round_passed(&quarantine).await? {
                        quarantine.consensus_opened_at = Some(now);
                        self.healing.put_quarantine(quarantine).await?;
                    }
                }
                _ => {}
            }
        }

        Ok(expired_total)
    }

    /// Validate a challenge response from a reader.
    pub async fn submit_response(
        &self,
        reader_id: &str,
        challenge_id: Uuid,
        response: &ChallengeResponse,
    ) -> Result<ChallengeResult> {
        let now = self.clock.now_unix();
        let policy = self.policy.load();

        let mut challenge = self
            .healing
            .get_challenge(challenge_id)
            .await?
            .ok_or(TollError::ChallengeNotFound(challenge_id))?;

        if challenge.reader_id != reader_id {
            return Err(TollError::InvalidChallenge(
                "challenge belongs to a different reader".to_string(),
            ));
        }
        if !challenge.is_open() {
            return Err(TollError::InvalidChallenge(
                "challenge already resolved".to_string(),
            ));
        }

        let mut quarantine = self
            .healing
            .active_quarantine(reader_id)
            .await?
            .ok_or_else(|| TollError::QuarantineNotFound(reader_id.to_string()))?;
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;

        if now > challenge.expires_at {
            challenge.outcome = Some(ChallengeOutcome::Expired);
            self.healing.put_challenge(challenge).await?;
            self.fail_probation(&mut reader, &mut quarantine, "challenge expired")
                .await?;
            return Ok(ChallengeResult {
                outcome: Some(ChallengeOutcome::Expired),
                attempts_remaining: 0,
                all_passed: false,
                consensus_opened: false,
            });
        }

        let passed = match challenge.kind {
            ChallengeKind::KnownTag => {
                let expected = challenge.expected_tag_hash.as_deref().unwrap_or_default();
                response
                    .tag_hash
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case(expected))
                    .unwrap_or(false)
            }
            ChallengeKind::Timing => {
                let nonce_ok = response.nonce.as_deref()
                    == challenge.challenge_data.as_deref();
                let in_window = response
                    .elapsed_ms
                    .map(|ms| ms <= policy.challenges.timing_window_ms)
                    .unwrap_or(false);
                nonce_ok && in_window
            }
            ChallengeKind::HashVerify => {
                let payload = challenge
                    .challenge_data
                    .as_deref()
                    .and_then(|d| hex::decode(d).ok())
                    .unwrap_or_default();
                let expected = sha256_hex(&payload);
                response
                    .digest_hex
                    .as_deref()
                    .map(|d| d.eq_ignore_ascii_case(&expected))
                    .unwrap_or(false)
            }
        };

        if passed {
            challenge.outcome = Some(ChallengeOutcome::Passed);
            self.healing.put_challenge(challenge).await?;

            let all_passed = self.round_passed(&quarantine).await?;
            let mut consensus_opened = false;
            if all_passed && quarantine.consensus_opened_at.is_none() {
                quarantine.consensus_opened_at = Some(now);
                self.healing.put_quarantine(quarantine).await?;
                consensus_opened = true;
                info!(reader_id, "probation challenges passed, peer voting open");
            }
            return Ok(ChallengeResult {
                outcome: Some(ChallengeOutcome::Passed),
                attempts_remaining: 0,
                all_passed,
                consensus_opened,
            });
        }

        challenge.attempts_remaining = challenge.attempts_remaining.saturating_sub(1);
        if challenge.attempts_remaining == 0 {
            challenge.outcome = Some(ChallengeOutcome::Failed);
            self.healing.put_challenge(challenge).await?;
            self.fail_probation(&mut reader, &mut quarantine, "challenge failed")
                .await?;
            return Ok(ChallengeResult {
                outcome: Some(ChallengeOutcome::Failed),
                attempts_remaining: 0,
                all_passed: false,
                consensus_opened: false,
            });
        }

        let remaining = challenge.attempts_remaining;
        self.healing.put_challenge(challenge).await?;
        Ok(ChallengeResult {
            outcome: None,
            attempts_remaining: remaining,
            all_passed: false,
            consensus_opened: false,
        })
    }

    /// Cast (or re-cast) a peer vote on restoring `subject`.
    pub async fn cast_vote(
        &self,
        subject_reader_id: &str,
        voter_reader_id: &str,
        vote: Vote,
    ) -> Result<ConsensusStatus> {
        let now = self.clock.now_unix();
        let policy = self.policy.load();

        if subject_reader_id == voter_reader_id {
            return Err(TollError::InvalidVote(
                "cannot vote on own quarantine".to_string(),
            ));
        }

        let mut quarantine = self
            .healing
            .active_quarantine(subject_reader_id)
            .await?
            .ok_or_else(|| TollError::QuarantineNotFound(subject_reader_id.to_string()))?;

        let opened_at = quarantine.consensus_opened_at.ok_or_else(|| {
            TollError::InvalidVote("peer voting is not open for this reader".to_string())
        })?;
        if now > opened_at + policy.consensus.timeout_secs {
            return Err(TollError::InvalidVote("voting window closed".to_string()));
        }

        let voter = self
            .readers
            .get(voter_reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(voter_reader_id.to_string()))?;
        if voter.status != ReaderStatus::Active {
            return Err(TollError::InvalidVote(
                "voter is not an active reader".to_string(),
            ));
        }

        self.healing
            .put_vote(PeerVote {
                subject_reader_id: subject_reader_id.to_string(),
                voter_reader_id: voter_reader_id.to_string(),
                vote,
                cast_at: now,
            })
            .await?;

        let mut reader = self
            .readers
            .get(subject_reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(subject_reader_id.to_string()))?;
        self.evaluate_consensus(&mut reader, &mut quarantine).await
    }

    /// Challenges belonging to the current probation round.
    async fn open_challenges(
        &self,
        quarantine: &QuarantineRecord,
    ) -> Result<Vec<ProbationChallenge>> {
        let started = quarantine.probation_started_at.unwrap_or(i64::MAX);
        Ok(self
            .healing
            .challenges_for(quarantine.quarantine_id)
            .await?
            .into_iter()
            .filter(|c| c.issued_at >= started && c.is_open())
            .collect())
    }

    /// All challenges of the current round exist and passed.
    async fn round_passed(&self, quarantine: &QuarantineRecord) -> Result<bool> {
        let started = match quarantine.probation_started_at {
            Some(t) => t,
            None => return Ok(false),
        };
        let round: Vec<ProbationChallenge> = self
            .healing
            .challenges_for(quarantine.quarantine_id)
            .await?
            .into_iter()
            .filter(|c| c.issued_at >= started)
            .collect();
        Ok(!round.is_empty()
            && round
                .iter()
                .all(|c| c.outcome == Some(ChallengeOutcome::Passed)))
    }

    async fn enter_probation(
        &self,
        reader: &mut Reader,
        mut quarantine: QuarantineRecord,
        recovered_score: i32,
        now: i64,
    ) -> Result<()> {
        let policy = self.policy.load();

        reader.trust_score = recovered_score;
        reader.status = ReaderStatus::Probation;
        reader.last_update_at = now;
        quarantine.probation_started_at = Some(now);
        quarantine.consensus_opened_at = None;

        // One challenge of each kind per severity level.
        let mut known_tags = policy.challenges.known_tags.clone();
        if known_tags.is_empty() {
            known_tags = self
                .cards
                .sample_tags(quarantine.severity as usize)
                .await?;
        }

        let kinds = [
            ChallengeKind::KnownTag,
            ChallengeKind::Timing,
            ChallengeKind::HashVerify,
        ];
        for round in 0..quarantine.severity as usize {
            for kind in kinds {
                // Without whitelisted tag material a KNOWN_TAG challenge is
                // unanswerable; substitute a hash challenge.
                let kind = if kind == ChallengeKind::KnownTag && known_tags.is_empty() {
                    ChallengeKind::HashVerify
                } else {
                    kind
                };
                let (expected_tag_hash, challenge_data) = match kind {
                    ChallengeKind::KnownTag => (
                        Some(known_tags[round % known_tags.len()].clone()),
                        None,
                    ),
                    ChallengeKind::Timing => (None, Some(generate_nonce())),
                    ChallengeKind::HashVerify => (None, Some(generate_nonce())),
                };
                self.healing
                    .put_challenge(ProbationChallenge {
                        challenge_id: Uuid::new_v4(),
                        quarantine_id: quarantine.quarantine_id,
                        reader_id: reader.reader_id.clone(),
                        kind,
                        expected_tag_hash,
                        challenge_data,
                        issued_at: now,
                        expires_at: now + policy.challenges.ttl_secs,
                        attempts_remaining: policy.challenges.max_attempts,
                        outcome: None,
                    })
                    .await?;
            }
        }

        self.healing.put_quarantine(quarantine).await?;
        self.readers.put(reader.clone()).await?;
        info!(
            reader_id = %reader.reader_id,
            score = recovered_score,
            "reader entered probation"
        );
        Ok(())
    }

    /// Evaluate the open vote; restores the reader when the approval ratio
    /// over eligible active peers is met.
    async fn evaluate_consensus(
        &self,
        reader: &mut Reader,
        quarantine: &mut QuarantineRecord,
    ) -> Result<ConsensusStatus> {
        let policy = self.policy.load();
        let opened_at = quarantine.consensus_opened_at.unwrap_or(i64::MAX);

        let eligible = self
            .readers
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == ReaderStatus::Active && r.reader_id != reader.reader_id)
            .count();

        let votes: Vec<PeerVote> = self
            .healing
            .votes_for(&reader.reader_id)
            .await?
            .into_iter()
            .filter(|v| v.cast_at >= opened_at)
            .collect();
        let approvals = votes.iter().filter(|v| v.vote == Vote::Approve).count();
        let rejections = votes.len() - approvals;

        let ratio_met = eligible > 0
            && (approvals as f64 / eligible as f64) >= policy.consensus.approval_ratio;
        let quorum_met = votes.len() >= policy.consensus.min_voters;

        let restored = ratio_met && quorum_met;
        if restored {
            self.restore(reader, quarantine).await?;
        }

        Ok(ConsensusStatus {
            approvals,
            rejections,
            eligible,
            restored,
        })
    }

    async fn restore(
        &self,
        reader: &mut Reader,
        quarantine: &mut QuarantineRecord,
    ) -> Result<()> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();

        reader.trust_score = policy.thresholds.restore_score.clamp(0, 100);
        reader.status = ReaderStatus::Active;
        reader.consecutive_successes = 0;
        reader.last_update_at = now;
        quarantine.cleared_at = Some(now);

        self.healing.put_quarantine(quarantine.clone()).await?;
        self.healing.clear_votes_for(&reader.reader_id).await?;
        self.healing
            .clear_suspicions_from(&reader.reader_id)
            .await?;
        self.readers.put(reader.clone()).await?;

        info!(
            reader_id = %reader.reader_id,
            score = reader.trust_score,
            "reader restored via probation and peer consensus"
        );
        Ok(())
    }

    /// Any-stage failure: back to QUARANTINED with escalated severity.
    async fn fail_probation(
        &self,
        reader: &mut Reader,
        quarantine: &mut QuarantineRecord,
        reason: &str,
    ) -> Result<()> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();

        let penalty = policy.base_penalty(ViolationClass::ProbationFailure)
            * policy.penalty_weight(ViolationClass::ProbationFailure);
        let old_score = reader.trust_score;
        reader.trust_score = ((reader.trust_score as f64) - penalty).round().clamp(0.0, 100.0) as i32;
        reader.status = ReaderStatus::Quarantined;
        reader.last_violation_at = Some(now);
        reader.last_update_at = now;

        quarantine.severity = (quarantine.severity + 1).min(3);
        quarantine.probation_started_at = None;
        quarantine.consensus_opened_at = None;
        // Quarantine recovery restarts from this failure.
        quarantine.entered_at = now;

        self.violations
            .append(ViolationRecord {
                reader_id: reader.reader_id.clone(),
                class: ViolationClass::ProbationFailure,
                delta: reader.trust_score - old_score,
                detail: reason.to_string(),
                at: now,
            })
            .await?;

        self.healing.put_quarantine(quarantine.clone()).await?;
        self.healing.clear_votes_for(&reader.reader_id).await?;
        self.readers.put(reader.clone()).await?;

        warn!(
            reader_id = %reader.reader_id,
            severity = quarantine.severity,
            reason,
            "probation failed, reader re-quarantined"
        );
        Ok(())
    }
}
