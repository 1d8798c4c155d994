//! Scores a probe against a registry snapshot and turns the best candidate
//! into a [`MatchDecision`].

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ProbeError};
use crate::identity::{EnrolledIdentity, IdentityId, Profile};
use crate::metric::{Metric, Score};
use crate::registry::RegistrySnapshot;
use crate::Embedding;

/// Absorbs f32 rounding so a candidate exactly `ambiguity_slack` away from
/// the best still lands in the near-tie band.
const BAND_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::High => write!(f, "High"),
            ConfidenceTier::Medium => write!(f, "Medium"),
            ConfidenceTier::Low => write!(f, "Low"),
        }
    }
}

/// Lower bounds (inclusive) of the High and Medium tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBoundaries {
    pub high: f32,
    pub medium: f32,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            high: 0.85,
            medium: 0.70,
        }
    }
}

impl TierBoundaries {
    pub fn classify(&self, similarity: f32) -> ConfidenceTier {
        if similarity >= self.high {
            ConfidenceTier::High
        } else if similarity >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub metric: Metric,
    /// Minimum similarity accepted as a match.
    pub threshold: f32,
    /// Width of the near-tie band, in the metric's distance space.
    pub ambiguity_slack: f32,
    /// Near-ties at or above this similarity are not treated as ambiguous.
    pub high_confidence_cutoff: f32,
    /// Decimal places kept in the reported similarity.
    pub precision: u32,
    /// Dimension the deployment's extractor produces, if known.
    pub expected_dimension: Option<usize>,
    pub tiers: TierBoundaries,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            threshold: 0.7,
            ambiguity_slack: 0.1,
            high_confidence_cutoff: 0.8,
            precision: 3,
            expected_dimension: None,
            tiers: TierBoundaries::default(),
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if !(0.0..=1.0).contains(&self.high_confidence_cutoff) {
            return Err(ConfigError::HighConfidenceCutoff(self.high_confidence_cutoff));
        }
        if !(self.ambiguity_slack >= 0.0) {
            return Err(ConfigError::AmbiguitySlack(self.ambiguity_slack));
        }
        if !(self.tiers.high >= self.tiers.medium) {
            return Err(ConfigError::TierOrder {
                high: self.tiers.high,
                medium: self.tiers.medium,
            });
        }
        if self.precision > 6 {
            return Err(ConfigError::Precision(self.precision));
        }
        Ok(())
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Matched,
    BelowThreshold,
    Ambiguous,
    NoIdentities,
    NoCompatible,
    /// No registry snapshot was ever loaded.
    NotReady,
}

/// The identity a decision points at, without its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRef {
    pub id: IdentityId,
    pub profile: Profile,
}

impl From<&EnrolledIdentity> for IdentityRef {
    fn from(identity: &EnrolledIdentity) -> Self {
        Self {
            id: identity.id,
            profile: identity.profile.clone(),
        }
    }
}

/// Result of one match call.
///
/// `best_identity` is set iff `matched`. `similarity` always carries the best
/// candidate's score, also for misses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub matched: bool,
    pub best_identity: Option<IdentityRef>,
    /// Best-scoring candidate regardless of outcome.
    pub candidate_id: Option<IdentityId>,
    pub similarity: f32,
    pub confidence: ConfidenceTier,
    pub ambiguous: bool,
    pub outcome: Outcome,
    pub reason: String,
    /// Candidates inside the near-tie band, best first then enrollment order.
    pub contenders: Vec<IdentityId>,
    pub compatible: usize,
    pub incompatible: usize,
}

/// Read-only view for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub compatible: usize,
    pub incompatible: usize,
    pub rejected: usize,
    pub dimension: Option<usize>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub generation: u64,
    pub threshold: f32,
    pub metric: Metric,
}

/// Stateless between calls: each decision depends only on the probe, the
/// snapshot and the config.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatchConfig,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn identify(
        &self,
        probe: &Embedding,
        snapshot: &RegistrySnapshot,
    ) -> Result<MatchDecision, ProbeError> {
        self.decide(probe, snapshot.identities())
    }

    /// Score `probe` against `identities` and decide.
    ///
    /// Only a malformed probe is an error; every data problem comes back as
    /// a non-matching decision with a reason.
    pub fn decide(
        &self,
        probe: &Embedding,
        identities: &[EnrolledIdentity],
    ) -> Result<MatchDecision, ProbeError> {
        check_probe(probe)?;
        let cfg = &self.config;

        if identities.is_empty() {
            return Ok(self.miss(
                Outcome::NoIdentities,
                0.0,
                "no identities enrolled".to_string(),
                0,
                0,
            ));
        }

        let dim = probe.dim();
        let compatible: Vec<&EnrolledIdentity> =
            identities.iter().filter(|i| i.dim() == dim).collect();
        let incompatible = identities.len() - compatible.len();

        if compatible.is_empty() {
            let registry_dim = identities[0].dim();
            let share = incompatible * 100 / identities.len();
            warn!(
                "All {} enrolled vectors are incompatible with probe dimension {}",
                incompatible, dim
            );
            return Ok(self.miss(
                Outcome::NoCompatible,
                0.0,
                format!(
                    "no compatible encodings: {} of {} enrolled vectors ({}%) are incompatible; \
                     probe has dimension {}, registry expects {}",
                    incompatible,
                    identities.len(),
                    share,
                    dim,
                    registry_dim
                ),
                0,
                incompatible,
            ));
        }
        if incompatible > 0 {
            warn!(
                "Excluded {} of {} enrolled vectors with dimension != {}",
                incompatible,
                identities.len(),
                dim
            );
        }

        let scores: Vec<Score> = compatible
            .iter()
            .map(|i| cfg.metric.score(probe, &i.embedding))
            .collect();

        // first-seen wins among exact ties
        let mut best = 0;
        for (idx, score) in scores.iter().enumerate().skip(1) {
            if score.distance < scores[best].distance {
                best = idx;
            }
        }
        let best_identity = compatible[best];
        let best_score = scores[best];
        let similarity = round_to(best_score.similarity, cfg.precision);
        let confidence = cfg.tiers.classify(similarity);

        let mut contenders = vec![best_identity.id];
        contenders.extend(
            scores
                .iter()
                .enumerate()
                .filter(|&(idx, s)| {
                    idx != best
                        && s.distance - best_score.distance
                            <= cfg.ambiguity_slack + BAND_EPSILON
                })
                .map(|(idx, _)| compatible[idx].id),
        );

        debug!(
            "Best candidate {} similarity {:.4} ({} contenders)",
            best_identity.id,
            best_score.similarity,
            contenders.len()
        );

        let ambiguous = contenders.len() > 1 && similarity < cfg.high_confidence_cutoff;
        let (outcome, reason) = if ambiguous {
            (
                Outcome::Ambiguous,
                format!(
                    "multiple candidates similar: {} identities within {} of the best match",
                    contenders.len(),
                    cfg.ambiguity_slack
                ),
            )
        } else if similarity >= cfg.threshold {
            let name = best_identity.profile.display_name();
            let who = if name.is_empty() {
                format!("identity {}", best_identity.id)
            } else {
                name
            };
            let mut reason = format!(
                "identified {} with {} confidence",
                who,
                confidence.to_string().to_lowercase()
            );
            if best_identity.profile.watchlisted {
                reason.push_str("; identity is on the watch list");
            }
            (Outcome::Matched, reason)
        } else {
            (
                Outcome::BelowThreshold,
                format!(
                    "no sufficient match: best similarity {:.3} below threshold {:.3}",
                    similarity, cfg.threshold
                ),
            )
        };

        let matched = outcome == Outcome::Matched;
        Ok(MatchDecision {
            matched,
            best_identity: matched.then(|| IdentityRef::from(best_identity)),
            candidate_id: Some(best_identity.id),
            similarity,
            confidence,
            ambiguous,
            outcome,
            reason,
            contenders,
            compatible: compatible.len(),
            incompatible,
        })
    }

    /// Decision for a registry that has never loaded successfully.
    pub fn not_ready(&self) -> MatchDecision {
        self.miss(
            Outcome::NotReady,
            0.0,
            "registry not loaded".to_string(),
            0,
            0,
        )
    }

    pub fn stats(&self, snapshot: &RegistrySnapshot) -> RegistryStats {
        let total = snapshot.len();
        let compatible = match self.config.expected_dimension.or(snapshot.dimension()) {
            Some(dim) => snapshot.vectors().filter(|v| v.dim() == dim).count(),
            None => 0,
        };
        RegistryStats {
            total,
            compatible,
            incompatible: total - compatible,
            rejected: snapshot.rejected(),
            dimension: snapshot.dimension(),
            loaded_at: snapshot.loaded_at(),
            generation: snapshot.generation(),
            threshold: self.config.threshold,
            metric: self.config.metric,
        }
    }

    fn miss(
        &self,
        outcome: Outcome,
        similarity: f32,
        reason: String,
        compatible: usize,
        incompatible: usize,
    ) -> MatchDecision {
        MatchDecision {
            matched: false,
            best_identity: None,
            candidate_id: None,
            similarity,
            confidence: self.config.tiers.classify(similarity),
            ambiguous: false,
            outcome,
            reason,
            contenders: Vec::new(),
            compatible,
            incompatible,
        }
    }
}

pub(crate) fn check_probe(probe: &Embedding) -> Result<(), ProbeError> {
    if probe.dim() == 0 {
        return Err(ProbeError::Empty);
    }
    if let Some(index) = probe.vector.iter().position(|v| !v.is_finite()) {
        return Err(ProbeError::NonFinite { index });
    }
    Ok(())
}

fn round_to(value: f32, precision: u32) -> f32 {
    let factor = 10f64.powi(precision as i32);
    ((value as f64 * factor).round() / factor) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: u64, v: &[f32]) -> EnrolledIdentity {
        EnrolledIdentity::new(id, Profile::default(), Embedding::new(v.to_vec()).unwrap())
    }

    fn matcher(threshold: f32) -> Matcher {
        Matcher::new(MatchConfig {
            threshold,
            ..MatchConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_tiers() {
        let tiers = TierBoundaries::default();
        assert_eq!(tiers.classify(0.85), ConfidenceTier::High);
        assert_eq!(tiers.classify(0.849), ConfidenceTier::Medium);
        assert_eq!(tiers.classify(0.70), ConfidenceTier::Medium);
        assert_eq!(tiers.classify(0.699), ConfidenceTier::Low);

        let light = TierBoundaries {
            high: 0.8,
            medium: 0.7,
        };
        assert_eq!(light.classify(0.8), ConfidenceTier::High);
    }

    #[test]
    fn test_validate_config() {
        assert!(MatchConfig::default().validate().is_ok());
        let bad = MatchConfig {
            threshold: 1.5,
            ..MatchConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::Threshold(1.5)));
        let bad = MatchConfig {
            ambiguity_slack: f32::NAN,
            ..MatchConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::AmbiguitySlack(_))));
        let bad = MatchConfig {
            tiers: TierBoundaries {
                high: 0.6,
                medium: 0.7,
            },
            ..MatchConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::TierOrder { .. })));
        assert!(Matcher::new(MatchConfig {
            precision: 9,
            ..MatchConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.70710677, 3), 0.707);
        assert_eq!(round_to(0.9996, 3), 1.0);
        assert_eq!(round_to(0.12345, 0), 0.0);
    }

    #[test]
    fn test_probe_errors() {
        let m = matcher(0.6);
        let reg = vec![identity(1, &[1.0, 0.0])];
        assert_eq!(
            m.decide(&Embedding::probe(vec![]), &reg),
            Err(ProbeError::Empty)
        );
        assert_eq!(
            m.decide(&Embedding::probe(vec![1.0, f32::NAN]), &reg),
            Err(ProbeError::NonFinite { index: 1 })
        );
    }

    #[test]
    fn test_first_seen_wins_exact_tie() {
        let m = Matcher::new(MatchConfig {
            threshold: 0.5,
            high_confidence_cutoff: 0.0,
            ..MatchConfig::default()
        })
        .unwrap();
        let reg = vec![identity(4, &[1.0, 0.0]), identity(2, &[1.0, 0.0])];
        let d = m.decide(&Embedding::probe(vec![1.0, 0.0]), &reg).unwrap();
        assert!(d.matched);
        assert!(!d.ambiguous);
        assert_eq!(d.best_identity.unwrap().id, 4);
        assert_eq!(d.contenders, vec![4, 2]);
    }

    #[test]
    fn test_near_tie_below_cutoff_is_ambiguous() {
        let m = matcher(0.6);
        let reg = vec![identity(1, &[1.0, 0.0, 0.0]), identity(2, &[0.0, 1.0, 0.0])];
        let d = m
            .decide(&Embedding::probe(vec![0.5, 0.5, 0.0]), &reg)
            .unwrap();
        assert!(!d.matched);
        assert!(d.ambiguous);
        assert_eq!(d.outcome, Outcome::Ambiguous);
        assert!(d.best_identity.is_none());
        assert_eq!(d.candidate_id, Some(1));
        assert_eq!(d.similarity, 0.707);
        assert!(d.reason.starts_with("multiple candidates similar"));
    }

    #[test]
    fn test_near_tie_above_cutoff_still_matches() {
        let m = matcher(0.6);
        let reg = vec![identity(1, &[1.0, 0.0]), identity(2, &[0.995, 0.0998])];
        let d = m.decide(&Embedding::probe(vec![1.0, 0.0]), &reg).unwrap();
        assert!(d.matched);
        assert!(!d.ambiguous);
        assert_eq!(d.contenders.len(), 2);
        assert_eq!(d.best_identity.unwrap().id, 1);
    }

    #[test]
    fn test_candidate_exactly_slack_away_is_contender() {
        let m = Matcher::new(MatchConfig {
            threshold: 0.6,
            high_confidence_cutoff: 0.9,
            ..MatchConfig::default()
        })
        .unwrap();
        // cos 0.8 and cos 0.7: distances 0.2 and 0.3, exactly the slack apart
        let reg = vec![
            identity(1, &[0.8, 0.6]),
            identity(2, &[0.7, 0.51f32.sqrt()]),
        ];
        let d = m.decide(&Embedding::probe(vec![1.0, 0.0]), &reg).unwrap();
        assert_eq!(d.similarity, 0.8);
        assert_eq!(d.contenders, vec![1, 2]);
        assert!(d.ambiguous);
        assert!(!d.matched);
        assert_eq!(d.outcome, Outcome::Ambiguous);
    }

    #[test]
    fn test_candidate_beyond_slack_is_not_contender() {
        let m = Matcher::new(MatchConfig {
            threshold: 0.6,
            high_confidence_cutoff: 0.9,
            ..MatchConfig::default()
        })
        .unwrap();
        let reg = vec![
            identity(1, &[0.8, 0.6]),
            identity(2, &[0.69, (1.0f32 - 0.69 * 0.69).sqrt()]),
        ];
        let d = m.decide(&Embedding::probe(vec![1.0, 0.0]), &reg).unwrap();
        assert_eq!(d.contenders, vec![1]);
        assert!(d.matched);
    }

    #[test]
    fn test_incompatible_share_in_reason() {
        let m = matcher(0.6);
        let reg = vec![
            identity(1, &[1.0, 0.0, 0.0]),
            identity(2, &[0.0, 1.0, 0.0]),
            identity(3, &[0.0, 0.0, 1.0]),
        ];
        let d = m.decide(&Embedding::probe(vec![1.0, 0.0]), &reg).unwrap();
        assert_eq!(d.outcome, Outcome::NoCompatible);
        assert!(d.reason.contains("3 of 3 enrolled vectors (100%)"), "{}", d.reason);
    }

    #[test]
    fn test_not_ready_decision() {
        let d = matcher(0.6).not_ready();
        assert!(!d.matched);
        assert_eq!(d.outcome, Outcome::NotReady);
        assert_eq!(d.similarity, 0.0);
        assert_eq!(d.reason, "registry not loaded");
        assert!(d.best_identity.is_none());
    }

    #[test]
    fn test_watchlisted_match_is_flagged_in_reason() {
        let m = matcher(0.6);
        let mut flagged = identity(3, &[0.0, 1.0]);
        flagged.profile.first_name = "Luis".into();
        flagged.profile.watchlisted = true;
        let d = m
            .decide(&Embedding::probe(vec![0.0, 1.0]), &[flagged])
            .unwrap();
        assert!(d.matched);
        assert_eq!(
            d.reason,
            "identified Luis with high confidence; identity is on the watch list"
        );
        assert!(d.best_identity.unwrap().profile.watchlisted);
    }

    #[test]
    fn test_stats_against_expected_dimension() {
        let snapshot = RegistrySnapshot::from_identities(vec![
            identity(1, &[1.0, 0.0]),
            identity(2, &[0.0, 1.0]),
            identity(3, &[0.0, 1.0, 0.0]),
        ]);
        let m = Matcher::new(MatchConfig {
            expected_dimension: Some(3),
            ..MatchConfig::default()
        })
        .unwrap();
        let stats = m.stats(&snapshot);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.compatible, 1);
        assert_eq!(stats.incompatible, 2);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(stats.threshold, 0.7);

        let stats = Matcher::default().stats(&snapshot);
        assert_eq!(stats.compatible, 2);
    }
}
