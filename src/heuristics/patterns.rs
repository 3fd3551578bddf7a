//! Pattern tables for the local heuristic analyzer.
//!
//! Deliberately a flat, auditable list of weighted regex rules rather than
//! a model. Weights are tuned so that two strong signals (or one strong
//! signal plus the multi-match bonus) cross the default 0.7 threshold,
//! while a single weak signal stays below it.

/// A single scoring rule: pattern, weight per match, category tag.
pub struct RuleSpec {
    pub pattern: &'static str,
    pub weight: f64,
    pub category: &'static str,
}

/// Ordered rule table evaluated against the lowercased text.
pub const RULES: &[RuleSpec] = &[
    RuleSpec {
        pattern: r"\b(stupid|idiot|idiots|dumb|moron|morons|worthless|pathetic|loser|losers|ugly|trash|garbage|mumu|mjinga|shenzi)\b",
        weight: 0.30,
        category: "insult",
    },
    RuleSpec {
        pattern: r"\bkill yourself\b|\bkys\b|\bgo die\b|\bshould (just )?die\b",
        weight: 0.50,
        category: "self_harm",
    },
    RuleSpec {
        pattern: r"\b(kill|murder|hurt|beat|strangle|destroy)\b \w{0,12}\s?(you|yourself|them|her|him|u)\b",
        weight: 0.45,
        category: "threat",
    },
    RuleSpec {
        pattern: r"\b(fuck|fucking|shit|bitch|bitches|bastard|asshole|dickhead)\b",
        weight: 0.25,
        category: "profanity",
    },
    RuleSpec {
        pattern: r"\b(slut|whore|ashawo|hoe)\b",
        weight: 0.40,
        category: "sexual_harassment",
    },
    RuleSpec {
        pattern: r"\b(nobody (likes|loves|wants) you|no one (likes|loves|wants) you|shut up|get lost|you people)\b",
        weight: 0.30,
        category: "harassment",
    },
    RuleSpec {
        pattern: r"\b(women|men|girls|boys) (belong|should stay) in\b|\bgo back to (your|the)\b",
        weight: 0.35,
        category: "identity_hate",
    },
    RuleSpec {
        pattern: r"\b(for a (woman|girl|man|boy)),? you('re| are)\b",
        weight: 0.25,
        category: "identity_hate",
    },
];

/// Regional slang markers used to fill in cultural context.
pub struct RegionSpec {
    pub pattern: &'static str,
    pub region: &'static str,
}

pub const REGIONS: &[RegionSpec] = &[
    RegionSpec {
        pattern: r"\b(ashawo|mumu|naija|wahala|oya|abeg)\b",
        region: "nigeria",
    },
    RegionSpec {
        pattern: r"\b(mjinga|shenzi|takataka|bonoko)\b",
        region: "kenya",
    },
    RegionSpec {
        pattern: r"\b(eish|voetsek|tsek)\b",
        region: "south_africa",
    },
    RegionSpec {
        pattern: r"\b(chale|obroni|kwasia)\b",
        region: "ghana",
    },
];
