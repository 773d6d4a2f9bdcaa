//! The agency gate: does this NPC agree to go where it was asked?
//!
//! A pure function of the NPC's traits and the destination. No randomness,
//! no model input; the same profile and destination always produce the same
//! decision.
//!
//! ```text
//! score = base
//!       + w_obedience   · obedience_level
//!       − w_stubborn    · stubbornness
//!       + w_disposition · disposition_to_player / 5
//!       + risk term       (safe: +bonus, dangerous: w_risk · risk_tolerance − penalty)
//!       + alignment term  (aligned +, neutral 0, misaligned −, anchored −−)
//! accept ⇔ clamp(score, 0, 1) ≥ threshold
//! ```

use std::collections::HashSet;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::AgencyConfig;
use crate::turn::MoveProposal;
use crate::world::{Location, NpcProfile};

/// Danger class of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// No danger markers.
    Safe,
    /// Tagged `danger` or described with a risky term.
    Dangerous,
}

/// How the destination relates to the NPC's goals and post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Destination words overlap goals or profession.
    Aligned,
    /// The NPC has no goals or profession to compare against.
    Neutral,
    /// No overlap.
    Misaligned,
    /// No overlap, and the NPC is tied to where it stands.
    Anchored,
}

/// One reason contributing to a refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalFactor {
    /// Stubbornness at or above the factor threshold.
    StubbornnessHigh,
    /// Dangerous destination and low risk tolerance.
    RiskAverse,
    /// Disposition at or below the hostility threshold.
    DispositionHostile,
    /// Destination does not serve the NPC's goals.
    GoalMisaligned,
    /// The NPC will not leave its post.
    AnchoredToPost,
    /// None of the above; the score was simply too low.
    LowCompliance,
}

impl RefusalFactor {
    /// Stable snake_case code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::StubbornnessHigh => "stubbornness_high",
            Self::RiskAverse => "risk_averse",
            Self::DispositionHostile => "disposition_hostile",
            Self::GoalMisaligned => "goal_misaligned",
            Self::AnchoredToPost => "anchored_to_post",
            Self::LowCompliance => "low_compliance",
        }
    }
}

impl fmt::Display for RefusalFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The intermediate terms of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    /// Clamped score in [0, 1].
    pub score: OrderedFloat<f32>,
    /// Destination danger.
    pub risk: RiskClass,
    /// Goal fit.
    pub alignment: Alignment,
}

/// A refused move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    /// Factors joined with `_` in fixed order, e.g.
    /// `stubbornness_high_goal_misaligned`.
    pub code: String,
    /// The individual factors, in fixed order.
    pub factors: Vec<RefusalFactor>,
    /// The NPC's refusal style, for narration.
    pub refusal_style: String,
    /// The score that fell short.
    pub score: OrderedFloat<f32>,
}

/// Outcome of the agency gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgencyDecision {
    /// The NPC goes.
    Accept {
        /// The clamped score.
        score: OrderedFloat<f32>,
    },
    /// The NPC stays.
    Refuse(Refusal),
}

impl AgencyDecision {
    /// Whether the move was accepted.
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }
}

/// Short words that carry no goal meaning.
const STOPWORDS: &[&str] = &[
    "about", "across", "along", "from", "have", "into", "near", "only", "over", "some", "that",
    "their", "them", "there", "they", "this", "very", "what", "when", "where", "which", "with",
];

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// The deterministic accept/refuse gate.
#[derive(Debug, Clone)]
pub struct AgencyGate {
    config: AgencyConfig,
}

impl AgencyGate {
    /// Create a gate with the given coefficients.
    #[must_use]
    pub fn new(config: AgencyConfig) -> Self {
        Self { config }
    }

    /// Classify the destination's danger.
    #[must_use]
    pub fn risk_class(&self, destination: &Location) -> RiskClass {
        let text = destination.search_text();
        let risky = destination.has_tag("danger")
            || self
                .config
                .risky_terms
                .iter()
                .any(|term| text.contains(&term.to_lowercase()));
        if risky { RiskClass::Dangerous } else { RiskClass::Safe }
    }

    /// Classify the destination against the NPC's goals and post.
    #[must_use]
    pub fn alignment(&self, npc: &NpcProfile, destination: &Location) -> Alignment {
        let mut vocabulary = content_words(&npc.profession);
        for goal in &npc.goals {
            vocabulary.extend(content_words(goal));
        }
        if vocabulary.is_empty() {
            return Alignment::Neutral;
        }
        if !vocabulary.is_disjoint(&content_words(&destination.search_text())) {
            return Alignment::Aligned;
        }
        if self.is_anchored(npc) {
            Alignment::Anchored
        } else {
            Alignment::Misaligned
        }
    }

    fn is_anchored(&self, npc: &NpcProfile) -> bool {
        let profession = npc.profession.to_lowercase();
        let goals = npc.goals.join(" ").to_lowercase();
        let traits = npc.traits.join(" ").to_lowercase();
        let cfg = &self.config;

        cfg.anchored_professions.iter().any(|r| profession.contains(&r.to_lowercase()))
            || cfg.anchoring_goal_terms.iter().any(|g| goals.contains(&g.to_lowercase()))
            || cfg.cautious_traits.iter().any(|t| traits.contains(&t.to_lowercase()))
    }

    /// Compute the score and its classifications.
    #[must_use]
    pub fn assess(&self, npc: &NpcProfile, destination: &Location) -> Assessment {
        let cfg = &self.config;
        let risk = self.risk_class(destination);
        let alignment = self.alignment(npc, destination);

        let risk_term = match risk {
            RiskClass::Safe => cfg.safe_destination_bonus,
            RiskClass::Dangerous => cfg.risk_tolerance_weight * npc.risk_tolerance - cfg.danger_penalty,
        };
        let alignment_term = match alignment {
            Alignment::Aligned => cfg.aligned_bonus,
            Alignment::Neutral => 0.0,
            Alignment::Misaligned => -cfg.misaligned_penalty,
            Alignment::Anchored => -cfg.anchored_penalty,
        };

        let raw = cfg.base_score + cfg.obedience_weight * npc.obedience_level
            - cfg.stubbornness_weight * npc.stubbornness
            + cfg.disposition_weight * (f32::from(npc.disposition_to_player) / 5.0)
            + risk_term
            + alignment_term;

        Assessment {
            score: OrderedFloat(raw.clamp(0.0, 1.0)),
            risk,
            alignment,
        }
    }

    /// Decide whether the NPC accepts `proposal`.
    #[must_use]
    pub fn decide(
        &self,
        npc: &NpcProfile,
        proposal: &MoveProposal,
        destination: &Location,
    ) -> AgencyDecision {
        let assessment = self.assess(npc, destination);
        trace!(
            npc = %npc.npc_id,
            to = %proposal.to_location,
            score = assessment.score.0,
            risk = ?assessment.risk,
            alignment = ?assessment.alignment,
            "Agency assessment"
        );

        if assessment.score.0 >= self.config.threshold {
            return AgencyDecision::Accept {
                score: assessment.score,
            };
        }

        let factors = self.refusal_factors(npc, &assessment);
        let code = factors
            .iter()
            .map(|f| f.code())
            .collect::<Vec<_>>()
            .join("_");
        AgencyDecision::Refuse(Refusal {
            code,
            factors,
            refusal_style: npc.refusal_style.clone(),
            score: assessment.score,
        })
    }

    fn refusal_factors(&self, npc: &NpcProfile, assessment: &Assessment) -> Vec<RefusalFactor> {
        let cfg = &self.config;
        let mut factors = Vec::new();
        if npc.stubbornness >= cfg.stubbornness_factor_at {
            factors.push(RefusalFactor::StubbornnessHigh);
        }
        if assessment.risk == RiskClass::Dangerous && npc.risk_tolerance < cfg.risk_averse_below {
            factors.push(RefusalFactor::RiskAverse);
        }
        if npc.disposition_to_player <= cfg.hostile_disposition_at {
            factors.push(RefusalFactor::DispositionHostile);
        }
        if matches!(assessment.alignment, Alignment::Misaligned | Alignment::Anchored) {
            factors.push(RefusalFactor::GoalMisaligned);
        }
        if assessment.alignment == Alignment::Anchored {
            factors.push(RefusalFactor::AnchoredToPost);
        }
        if factors.is_empty() {
            factors.push(RefusalFactor::LowCompliance);
        }
        factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::{Permanence, Trigger};
    use crate::types::{LocationId, NpcId};
    use crate::world::sample;

    fn npc(id: &str) -> NpcProfile {
        sample::hollowmere()
            .npcs
            .into_iter()
            .find(|n| n.npc_id.as_str() == id)
            .expect("sample npc")
    }

    fn location(id: &str) -> Location {
        sample::hollowmere()
            .locations
            .into_iter()
            .find(|l| l.location_id.as_str() == id)
            .expect("sample location")
    }

    fn proposal(npc: &str, to: &str) -> MoveProposal {
        MoveProposal {
            npc_id: NpcId::new(npc),
            from_location: LocationId::new("loc_001"),
            to_location: LocationId::new(to),
            trigger: Trigger::PlayerInstruction,
            reason: "asked".to_string(),
            permanence: Permanence::Temporary,
            confidence: None,
        }
    }

    fn gate() -> AgencyGate {
        AgencyGate::new(AgencyConfig::default())
    }

    #[test]
    fn stubborn_archivist_refuses_the_yard() {
        let decision = gate().decide(&npc("npc_007"), &proposal("npc_007", "loc_003"), &location("loc_003"));
        let AgencyDecision::Refuse(refusal) = decision else {
            panic!("expected refusal, got {decision:?}");
        };
        assert_eq!(refusal.code, "stubbornness_high_goal_misaligned");
        assert_eq!(refusal.refusal_style, "curt");
    }

    #[test]
    fn willing_courier_accepts_the_road() {
        let gate = gate();
        let courier = npc("npc_001");
        assert_eq!(gate.alignment(&courier, &location("loc_002")), Alignment::Aligned);
        assert!(gate.decide(&courier, &proposal("npc_001", "loc_002"), &location("loc_002")).is_accept());
    }

    #[test]
    fn guard_is_anchored_to_post() {
        let gate = gate();
        let guard = npc("npc_003");
        assert_eq!(gate.alignment(&guard, &location("loc_002")), Alignment::Anchored);
        let AgencyDecision::Refuse(refusal) =
            gate.decide(&guard, &proposal("npc_003", "loc_002"), &location("loc_002"))
        else {
            panic!("guard should refuse");
        };
        assert_eq!(refusal.code, "goal_misaligned_anchored_to_post");
    }

    #[test]
    fn danger_is_detected_by_tag_and_terms() {
        let gate = gate();
        assert_eq!(gate.risk_class(&location("loc_005")), RiskClass::Dangerous);
        assert_eq!(gate.risk_class(&location("loc_003")), RiskClass::Safe);
    }

    #[test]
    fn risk_averse_and_hostile_factors() {
        let gate = gate();
        let mut timid = npc("npc_001");
        timid.risk_tolerance = 0.1;
        timid.obedience_level = 0.0;
        timid.disposition_to_player = -3;
        let AgencyDecision::Refuse(refusal) =
            gate.decide(&timid, &proposal("npc_001", "loc_005"), &location("loc_005"))
        else {
            panic!("timid courier should refuse the woods");
        };
        assert_eq!(
            refusal.factors,
            [RefusalFactor::RiskAverse, RefusalFactor::DispositionHostile, RefusalFactor::GoalMisaligned]
        );
    }

    #[test]
    fn low_compliance_fallback() {
        let gate = gate();
        let mut meek = npc("npc_001");
        meek.obedience_level = 0.0;
        meek.stubbornness = 0.6;
        // Road aligns with the courier's goals, so no other factor applies.
        let AgencyDecision::Refuse(refusal) =
            gate.decide(&meek, &proposal("npc_001", "loc_002"), &location("loc_002"))
        else {
            panic!("expected refusal");
        };
        assert_eq!(refusal.code, "low_compliance");
    }

    #[test]
    fn neutral_without_vocabulary() {
        let mut blank = npc("npc_001");
        blank.profession = String::new();
        blank.goals.clear();
        assert_eq!(gate().alignment(&blank, &location("loc_003")), Alignment::Neutral);
    }
}
