//! ICP scoring engine.
//!
//! A pure function of title, company, size band and funding stage against
//! a [`ScoringPolicy`]. Keywords are compiled once into word-boundary
//! regexes; the weight tables are data and can be loaded from JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contacts::model::{Contact, IcpScore, IndustryVertical, ScoringFields, SeniorityTier};
use crate::contacts::normalize;
use crate::error::ConfigError;

static VICE_PRESIDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bvice[\s\-]+president\b").expect("static regex"));

/// Keywords that place a title in a seniority tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierKeywords {
    pub tier: SeniorityTier,
    pub keywords: Vec<String>,
}

/// Keywords that place a company in an industry vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalKeywords {
    pub vertical: IndustryVertical,
    pub keywords: Vec<String>,
}

/// Weight and keyword tables for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub seniority_keywords: Vec<TierKeywords>,
    pub seniority_weights: BTreeMap<SeniorityTier, i64>,
    /// Ordered: earlier entries win ties.
    pub industry_keywords: Vec<VerticalKeywords>,
    pub industry_weights: BTreeMap<IndustryVertical, i64>,
    pub default_vertical: IndustryVertical,
    /// Keyed by normalised band, e.g. `51-200`.
    pub size_weights: BTreeMap<String, i64>,
    /// Keyed by normalised stage, e.g. `series_a`.
    pub funding_weights: BTreeMap<String, i64>,
    /// Title/company keywords marking a government affiliation.
    pub government_keywords: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        use IndustryVertical::*;
        use SeniorityTier::*;

        let seniority_keywords = vec![
            TierKeywords {
                tier: CSuite,
                keywords: words(&[
                    "founder", "co-founder", "cofounder", "ceo", "cto", "coo", "cfo", "cpo",
                    "cmo", "cxo", "chief", "chairman", "chairperson", "managing director",
                    "president", "md",
                ]),
            },
            TierKeywords {
                tier: VpDirector,
                keywords: words(&[
                    "vp", "svp", "evp", "avp", "director", "head of", "partner",
                    "managing partner", "general partner", "principal", "country head",
                ]),
            },
            TierKeywords {
                tier: ManagerIc,
                keywords: words(&[
                    "manager", "lead", "engineer", "analyst", "associate", "consultant",
                    "specialist",
                ]),
            },
        ];

        let industry_keywords = vec![
            VerticalKeywords {
                vertical: Fintech,
                keywords: words(&[
                    "fintech", "payments", "lending", "neobank", "insurance", "insurtech",
                    "wealth", "credit", "razorpay", "zerodha", "groww", "paytm", "cred",
                    "juspay", "pine labs", "policybazaar", "phonepe",
                ]),
            },
            VerticalKeywords {
                vertical: D2cEcomm,
                keywords: words(&[
                    "d2c", "ecommerce", "e-commerce", "retail", "marketplace", "nykaa",
                    "mamaearth", "meesho", "firstcry", "boat", "licious", "zivame",
                ]),
            },
            VerticalKeywords {
                vertical: SaasB2b,
                keywords: words(&[
                    "saas", "b2b", "software", "cloud", "freshworks", "zoho", "chargebee",
                    "postman", "browserstack", "leadsquared", "moengage",
                ]),
            },
            VerticalKeywords {
                vertical: VcPe,
                keywords: words(&[
                    "ventures", "capital", "venture capital", "private equity", "angel",
                    "angels", "fund", "sequoia", "accel", "blume", "lightspeed", "kalaari",
                    "chiratae", "stellaris", "peak xv",
                ]),
            },
            VerticalKeywords {
                vertical: DeepTechAi,
                keywords: words(&[
                    "ai", "artificial intelligence", "machine learning", "deeptech",
                    "robotics", "semiconductor", "nvidia", "sarvam", "krutrim", "isro",
                ]),
            },
            VerticalKeywords {
                vertical: Edtech,
                keywords: words(&[
                    "edtech", "education", "learning", "upgrad", "byju", "unacademy",
                    "eruditus", "physics wallah", "scaler",
                ]),
            },
            VerticalKeywords {
                vertical: Mobility,
                keywords: words(&[
                    "mobility", "ev", "electric vehicle", "logistics", "ola", "rapido",
                    "yulu", "zypp", "blusmart", "spinny",
                ]),
            },
            VerticalKeywords {
                vertical: Government,
                keywords: words(&[
                    "government", "ministry", "commission", "niti aayog", "g20", "nasscom",
                    "ispirt", "public sector",
                ]),
            },
        ];

        Self {
            seniority_keywords,
            seniority_weights: BTreeMap::from([(CSuite, 3), (VpDirector, 2), (ManagerIc, 1)]),
            industry_keywords,
            industry_weights: BTreeMap::from([
                (Fintech, 2),
                (D2cEcomm, 2),
                (SaasB2b, 2),
                (VcPe, 1),
                (DeepTechAi, 1),
                (Edtech, 1),
                (Mobility, 1),
                (Government, 0),
                (Other, 0),
            ]),
            default_vertical: SaasB2b,
            size_weights: BTreeMap::from([
                ("1-10".to_string(), 0),
                ("11-50".to_string(), 0),
                ("51-200".to_string(), 1),
                ("201-500".to_string(), 1),
                ("501-1000".to_string(), 0),
                ("1001-5000".to_string(), 0),
                ("5000+".to_string(), 0),
            ]),
            funding_weights: BTreeMap::from([
                ("seed".to_string(), 0),
                ("series_a".to_string(), 1),
                ("series_b".to_string(), 1),
                ("series_c".to_string(), 0),
                ("public".to_string(), 0),
            ]),
            government_keywords: words(&[
                "government", "ministry", "commission", "niti aayog", "g20", "nasscom",
                "ispirt", "public sector", "govt", "ias",
            ]),
        }
    }
}

impl ScoringPolicy {
    /// Load a policy from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("scoring policy {}: {e}", path.display()))
        })
    }
}

/// Build one case-insensitive alternation of keywords.
///
/// Word boundaries are added only on sides where the keyword starts or
/// ends with an alphanumeric, so keywords like `park+` still match.
pub(crate) fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>, ConfigError> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            let body = k
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            let lead = if k.starts_with(char::is_alphanumeric) { r"\b" } else { "" };
            let trail = if k.ends_with(char::is_alphanumeric) { r"\b" } else { "" };
            format!("{lead}{body}{trail}")
        })
        .collect();

    if alternatives.is_empty() {
        return Ok(None);
    }

    let pattern = format!("(?i)(?:{})", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key: "keywords".into(),
            message: e.to_string(),
        })
}

/// Scoring inputs for one contact.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub title: &'a str,
    pub company: &'a str,
    pub company_size_band: Option<&'a str>,
    pub funding_stage: Option<&'a str>,
}

impl<'a> From<&'a Contact> for ScoringInput<'a> {
    fn from(c: &'a Contact) -> Self {
        Self {
            title: &c.title,
            company: &c.company,
            company_size_band: c.enrichment.company_size_band.as_deref(),
            funding_stage: c.enrichment.funding_stage.as_deref(),
        }
    }
}

/// Compiled scoring engine.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    policy: ScoringPolicy,
    /// Highest rank first.
    tiers: Vec<(SeniorityTier, Regex)>,
    verticals: Vec<(IndustryVertical, Regex)>,
    government: Option<Regex>,
}

impl ScoringEngine {
    pub fn new(policy: ScoringPolicy) -> Result<Self, ConfigError> {
        let mut tiers = Vec::new();
        for entry in &policy.seniority_keywords {
            if let Some(re) = keyword_regex(&entry.keywords)? {
                tiers.push((entry.tier, re));
            }
        }
        tiers.sort_by(|a, b| b.0.cmp(&a.0));

        let mut verticals = Vec::new();
        for entry in &policy.industry_keywords {
            if let Some(re) = keyword_regex(&entry.keywords)? {
                verticals.push((entry.vertical, re));
            }
        }

        let government = keyword_regex(&policy.government_keywords)?;

        Ok(Self {
            policy,
            tiers,
            verticals,
            government,
        })
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Highest-ranking tier whose keywords appear in the title.
    pub fn seniority(&self, title: &str) -> SeniorityTier {
        let title = VICE_PRESIDENT.replace_all(title, "vp");
        self.tiers
            .iter()
            .find(|(_, re)| re.is_match(&title))
            .map(|(tier, _)| *tier)
            .unwrap_or(SeniorityTier::ManagerIc)
    }

    /// Vertical with the most keyword hits over company and title.
    pub fn industry(&self, company: &str, title: &str) -> IndustryVertical {
        let text = format!("{company} {title}");
        let mut best: Option<(IndustryVertical, usize)> = None;
        for (vertical, re) in &self.verticals {
            let hits = re.find_iter(&text).count();
            if hits > 0 && best.is_none_or(|(_, n)| hits > n) {
                best = Some((*vertical, hits));
            }
        }
        best.map(|(v, _)| v).unwrap_or(self.policy.default_vertical)
    }

    /// Title or company names a government body.
    pub fn is_government(&self, title: &str, company: &str) -> bool {
        self.government
            .as_ref()
            .is_some_and(|re| re.is_match(title) || re.is_match(company))
    }

    /// Score one input. Same input, same output.
    pub fn score(&self, input: ScoringInput<'_>) -> ScoringFields {
        let tier = self.seniority(input.title);
        let vertical = self.industry(input.company, input.title);

        let seniority_w = self.policy.seniority_weights.get(&tier).copied().unwrap_or(0);
        let industry_w = self.policy.industry_weights.get(&vertical).copied().unwrap_or(0);
        let size_w = input
            .company_size_band
            .and_then(normalize::size_band)
            .and_then(|band| self.policy.size_weights.get(&band).copied())
            .unwrap_or(0);
        let funding_w = input
            .funding_stage
            .and_then(normalize::funding_stage)
            .and_then(|stage| self.policy.funding_weights.get(&stage).copied())
            .unwrap_or(0);

        let icp = IcpScore::clamped(seniority_w + industry_w + size_w + funding_w);

        debug!(
            title = input.title,
            company = input.company,
            tier = %tier,
            vertical = %vertical,
            seniority_w,
            industry_w,
            size_w,
            funding_w,
            icp = %icp,
            "Scored contact"
        );

        ScoringFields {
            seniority_tier: Some(tier),
            industry_vertical: Some(vertical),
            icp_score: Some(icp),
        }
    }

    pub fn score_contact(&self, contact: &Contact) -> ScoringFields {
        self.score(ScoringInput::from(contact))
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        // Built-in tables only contain escaped literals.
        Self::new(ScoringPolicy::default()).unwrap_or_else(|_| Self {
            policy: ScoringPolicy::default(),
            tiers: Vec::new(),
            verticals: Vec::new(),
            government: None,
        })
    }
}
