//! Routing engine: owner, sender level, sequence variant, duplicates and
//! company conflicts.
//!
//! Routing sees the whole batch plus every stored contact before it
//! finalises anything. Round-robin positions are passed in and handed back
//! so the caller can persist them between runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contacts::model::{
    Contact, IndustryVertical, OwnerRole, RoutingFields, SenderLevel, SeniorityTier,
    SequenceVariant, UNASSIGNED,
};
use crate::contacts::normalize;
use crate::error::{ConfigError, ConflictError};

/// Role and sender level for one seniority tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRoute {
    pub tier: SeniorityTier,
    pub owner_role: OwnerRole,
    pub sender_level: SenderLevel,
}

/// Vertical to sequence variant mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRule {
    pub vertical: IndustryVertical,
    pub variant: SequenceVariant,
}

/// Routing tables and team rosters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    pub tiers: Vec<TierRoute>,
    pub teams: BTreeMap<OwnerRole, Vec<String>>,
    /// Most contacts one team member of a role should own. Roles without
    /// an entry are unlimited.
    pub capacity: BTreeMap<OwnerRole, usize>,
    pub variants: Vec<VariantRule>,
    pub default_variant: SequenceVariant,
    /// Name similarity, in percent, at which two contacts at one company
    /// are treated as the same person.
    pub duplicate_similarity: u8,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        use IndustryVertical::*;

        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let founder = SequenceVariant::FounderOperator;

        Self {
            tiers: vec![
                TierRoute {
                    tier: SeniorityTier::CSuite,
                    owner_role: OwnerRole::SeniorAe,
                    sender_level: SenderLevel::Leadership,
                },
                TierRoute {
                    tier: SeniorityTier::VpDirector,
                    owner_role: OwnerRole::Ae,
                    sender_level: SenderLevel::Ae,
                },
                TierRoute {
                    tier: SeniorityTier::ManagerIc,
                    owner_role: OwnerRole::Sdr,
                    sender_level: SenderLevel::Sdr,
                },
            ],
            teams: BTreeMap::from([
                (OwnerRole::SeniorAe, names(&["Priya Nair", "Vikram Sethi"])),
                (OwnerRole::Ae, names(&["Sneha Kapoor", "Rahul Desai", "Meera Iyer"])),
                (OwnerRole::Sdr, names(&["Arjun Sharma", "Divya Menon", "Karan Bose"])),
            ]),
            capacity: BTreeMap::from([
                (OwnerRole::SeniorAe, 30),
                (OwnerRole::Ae, 50),
                (OwnerRole::Sdr, 60),
            ]),
            variants: vec![
                VariantRule { vertical: Fintech, variant: founder },
                VariantRule { vertical: D2cEcomm, variant: founder },
                VariantRule { vertical: SaasB2b, variant: founder },
                VariantRule { vertical: DeepTechAi, variant: founder },
                VariantRule { vertical: Edtech, variant: founder },
                VariantRule { vertical: Mobility, variant: founder },
                VariantRule { vertical: VcPe, variant: SequenceVariant::Investor },
                VariantRule { vertical: Government, variant: SequenceVariant::Policy },
            ],
            default_variant: SequenceVariant::General,
            duplicate_similarity: 85,
        }
    }
}

impl RoutingPolicy {
    /// Load a policy from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("routing policy {}: {e}", path.display()))
        })
    }
}

/// Two or more routed contacts at one company with different owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyConflict {
    pub company_key: String,
    pub contact_ids: Vec<Uuid>,
    pub owners: Vec<String>,
    pub leadership_review: bool,
    pub detected_at: DateTime<Utc>,
}

impl CompanyConflict {
    pub fn to_error(&self) -> ConflictError {
        ConflictError::SplitOwnership {
            company_key: self.company_key.clone(),
            owners: self.owners.clone(),
        }
    }
}

/// Stored state of a conflict after it was recorded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictState {
    /// First time this company conflicted.
    New,
    /// Was resolved, but the owner set changed since.
    Reopened,
    /// Still waiting for a human.
    Open,
    /// Resolved and unchanged.
    Resolved,
}

impl ConflictState {
    pub fn is_open(self) -> bool {
        self != Self::Resolved
    }

    /// Newly raised in this run.
    pub fn is_new(self) -> bool {
        matches!(self, Self::New | Self::Reopened)
    }
}

/// Result of routing one batch.
#[derive(Debug, Clone, Default)]
pub struct RoutingOutcome {
    /// Contacts whose routing fields changed.
    pub updates: Vec<(Uuid, RoutingFields)>,
    pub conflicts: Vec<CompanyConflict>,
    /// Round-robin positions after this batch.
    pub cursors: BTreeMap<OwnerRole, u64>,
    pub duplicates: usize,
    pub capacity_overflow: usize,
}

/// Owner picked for one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    role: OwnerRole,
    owner: String,
    overflow: bool,
}

impl Assignment {
    fn unassigned() -> Self {
        Self {
            role: OwnerRole::Unassigned,
            owner: UNASSIGNED.to_string(),
            overflow: false,
        }
    }
}

/// Deterministic router over a [`RoutingPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RoutingEngine {
    policy: RoutingPolicy,
}

impl RoutingEngine {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Role and sender level for a tier, if the tier is mapped.
    pub fn route_for(&self, tier: SeniorityTier) -> Option<&TierRoute> {
        self.policy.tiers.iter().find(|r| r.tier == tier)
    }

    /// Variant for a vertical. Unmatched or ambiguous verticals get the default.
    pub fn variant_for(&self, vertical: Option<IndustryVertical>) -> SequenceVariant {
        let Some(vertical) = vertical else {
            return self.policy.default_variant;
        };
        let matched: HashSet<SequenceVariant> = self
            .policy
            .variants
            .iter()
            .filter(|r| r.vertical == vertical)
            .map(|r| r.variant)
            .collect();
        match matched.into_iter().collect::<Vec<_>>().as_slice() {
            [only] => *only,
            _ => self.policy.default_variant,
        }
    }

    /// Route a batch.
    ///
    /// `existing` is every stored contact; batch members found there are
    /// replaced by their batch copy. Only unrouted, scored batch contacts
    /// receive an owner. Conflict detection covers every company the batch
    /// touches; flagging contacts for leadership review is left to the
    /// caller, which knows whether a conflict was already resolved.
    pub fn route_batch(
        &self,
        batch: &[Contact],
        existing: &[Contact],
        cursors: &BTreeMap<OwnerRole, u64>,
        now: DateTime<Utc>,
    ) -> RoutingOutcome {
        let batch_ids: BTreeSet<Uuid> = batch.iter().map(|c| c.id).collect();
        let all: Vec<&Contact> = existing
            .iter()
            .filter(|c| !batch_ids.contains(&c.id))
            .chain(batch.iter())
            .collect();

        let mut fields: HashMap<Uuid, RoutingFields> =
            all.iter().map(|c| (c.id, c.routing.clone())).collect();
        let mut cursors = cursors.clone();
        let mut duplicates = 0;
        let mut capacity_overflow = 0;

        let keepers = duplicate_keepers(&all, self.policy.duplicate_similarity);
        let mut loads: HashMap<String, usize> = HashMap::new();
        for f in fields.values() {
            if f.has_owner() && f.duplicate_of.is_none()
                && let Some(owner) = &f.assigned_owner
            {
                *loads.entry(owner.clone()).or_default() += 1;
            }
        }

        // Highest ICP first so the best contacts claim owners first.
        let mut pending: Vec<&Contact> = batch
            .iter()
            .filter(|c| c.routing.routed_at.is_none() && c.scoring.seniority_tier.is_some())
            .collect();
        pending.sort_by(|a, b| {
            b.icp()
                .cmp(&a.icp())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        for contact in pending {
            if let Some(keeper) = keepers.get(&contact.id).copied()
                && keeper != contact.id
            {
                debug!(contact_id = %contact.id, keeper = %keeper, "Duplicate contact");
                duplicates += 1;
                fields.insert(
                    contact.id,
                    RoutingFields {
                        duplicate_of: Some(keeper),
                        routed_at: Some(now),
                        ..RoutingFields::default()
                    },
                );
                continue;
            }

            let assignment = self.assign(contact, &all, &fields, &loads, &mut cursors);
            debug!(
                contact_id = %contact.id,
                role = %assignment.role,
                owner = %assignment.owner,
                overflow = assignment.overflow,
                "Contact routed"
            );
            if assignment.role != OwnerRole::Unassigned {
                *loads.entry(assignment.owner.clone()).or_default() += 1;
            }
            if assignment.overflow {
                capacity_overflow += 1;
            }
            let tier_route = contact.scoring.seniority_tier.and_then(|t| self.route_for(t));
            fields.insert(
                contact.id,
                RoutingFields {
                    owner_role: Some(assignment.role),
                    assigned_owner: Some(assignment.owner),
                    sender_level: tier_route.map(|r| r.sender_level),
                    sequence_variant: Some(self.variant_for(contact.scoring.industry_vertical)),
                    leadership_review_required: false,
                    capacity_overflow: assignment.overflow,
                    duplicate_of: None,
                    routed_at: Some(now),
                },
            );
        }

        let conflicts = self.detect_conflicts(batch, &all, &fields, now);

        let updates = all
            .iter()
            .filter_map(|c| {
                let next = fields.get(&c.id)?;
                (next != &c.routing).then(|| (c.id, next.clone()))
            })
            .collect::<Vec<_>>();

        info!(
            updates = updates.len(),
            conflicts = conflicts.len(),
            duplicates,
            capacity_overflow,
            "Routing complete"
        );

        RoutingOutcome {
            updates,
            conflicts,
            cursors,
            duplicates,
            capacity_overflow,
        }
    }

    /// Pick role and owner for one contact.
    ///
    /// Company affinity wins over capacity. Otherwise the round-robin skips
    /// members at capacity; when the whole team is full the next member in
    /// the cycle takes the contact and the assignment is marked overflow.
    fn assign(
        &self,
        contact: &Contact,
        all: &[&Contact],
        fields: &HashMap<Uuid, RoutingFields>,
        loads: &HashMap<String, usize>,
        cursors: &mut BTreeMap<OwnerRole, u64>,
    ) -> Assignment {
        let Some(route) = contact.scoring.seniority_tier.and_then(|t| self.route_for(t)) else {
            return Assignment::unassigned();
        };
        let role = route.owner_role;
        let team = match self.policy.teams.get(&role) {
            Some(team) if !team.is_empty() => team,
            _ => {
                warn!(contact_id = %contact.id, role = %role, "No team members for role");
                return Assignment::unassigned();
            }
        };

        // Same company, same role: keep one owner.
        let affine = all
            .iter()
            .filter(|other| {
                other.id != contact.id
                    && other.normalized_company_key == contact.normalized_company_key
            })
            .filter_map(|other| fields.get(&other.id))
            .find(|f| f.owner_role == Some(role) && f.has_owner())
            .and_then(|f| f.assigned_owner.clone());
        if let Some(owner) = affine {
            return Assignment {
                role,
                owner,
                overflow: false,
            };
        }

        let size = team.len() as u64;
        let capacity = self.policy.capacity.get(&role).copied();
        let position = cursors.entry(role).or_insert(0);
        let free = (0..size).find(|step| {
            let member = &team[((*position + step) % size) as usize];
            capacity.is_none_or(|cap| loads.get(member).copied().unwrap_or(0) < cap)
        });
        let (step, overflow) = match free {
            Some(step) => (step, false),
            None => {
                warn!(contact_id = %contact.id, role = %role, "Every team member at capacity");
                (0, true)
            }
        };
        let owner = team[((*position + step) % size) as usize].clone();
        *position += step + 1;
        Assignment {
            role,
            owner,
            overflow,
        }
    }

    fn detect_conflicts(
        &self,
        batch: &[Contact],
        all: &[&Contact],
        fields: &HashMap<Uuid, RoutingFields>,
        now: DateTime<Utc>,
    ) -> Vec<CompanyConflict> {
        let touched: BTreeSet<&str> = batch
            .iter()
            .map(|c| c.normalized_company_key.as_str())
            .filter(|k| !k.is_empty())
            .collect();

        let mut conflicts = Vec::new();
        for key in touched {
            let members: Vec<&Contact> = all
                .iter()
                .copied()
                .filter(|c| c.normalized_company_key == key)
                .filter(|c| {
                    fields
                        .get(&c.id)
                        .is_some_and(|f| f.has_owner() && f.duplicate_of.is_none())
                })
                .collect();
            let owners: BTreeSet<String> = members
                .iter()
                .filter_map(|c| fields.get(&c.id)?.assigned_owner.clone())
                .collect();
            if owners.len() < 2 {
                continue;
            }

            let leadership_review = members.iter().any(|c| {
                c.icp() == 5 && c.scoring.seniority_tier == Some(SeniorityTier::CSuite)
            });

            let conflict = CompanyConflict {
                company_key: key.to_string(),
                contact_ids: members.iter().map(|c| c.id).collect(),
                owners: owners.into_iter().collect(),
                leadership_review,
                detected_at: now,
            };
            debug!(error = %conflict.to_error(), leadership_review, "Company conflict detected");
            conflicts.push(conflict);
        }
        conflicts
    }
}

/// Map each contact to the id of the record kept for its person.
///
/// Contacts sharing a company root are the same person when their
/// normalised names are equal or at least `similarity` percent alike
/// (normalised Levenshtein). An already-routed record is kept first, then
/// the highest ICP, then the earliest created.
fn duplicate_keepers(all: &[&Contact], similarity: u8) -> HashMap<Uuid, Uuid> {
    let mut groups: HashMap<String, Vec<&Contact>> = HashMap::new();
    for c in all {
        let root = normalize::company_root(&c.company);
        if root.is_empty() || c.routing.duplicate_of.is_some() {
            continue;
        }
        groups.entry(root).or_default().push(c);
    }

    let threshold = f64::from(similarity.min(100)) / 100.0;
    let mut keepers = HashMap::new();
    for members in groups.values_mut() {
        members.sort_by(|a, b| {
            let a_routed = a.routing.has_owner();
            let b_routed = b.routing.has_owner();
            b_routed
                .cmp(&a_routed)
                .then(b.icp().cmp(&a.icp()))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut kept: Vec<(Uuid, String)> = Vec::new();
        for m in members.iter() {
            let name = normalize::person_name(&m.name);
            let keeper = kept
                .iter()
                .find(|(_, other)| {
                    *other == name || strsim::normalized_levenshtein(other, &name) >= threshold
                })
                .map(|(id, _)| *id);
            match keeper {
                Some(id) => {
                    keepers.insert(m.id, id);
                }
                None => {
                    keepers.insert(m.id, m.id);
                    kept.push((m.id, name));
                }
            }
        }
    }
    keepers
}
