//! Plan catalog: maps a provider variant name to its quota and validity window.

use chrono::Duration;

const SECONDS_PER_DAY: i64 = 86400;

/// Quota of the fallback tier used for trials and unrecognized variants.
pub const TRIAL_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTier {
    Trial,
    Monthly,
    HalfYearly,
    Yearly,
}

impl PlanTier {
    /// Variant names are matched exactly as the provider reports them.
    pub fn from_variant(variant: &str) -> Self {
        match variant {
            "SmartDraft Premium (Monthly)" => PlanTier::Monthly,
            "SmartDraft Premium (Half Yearly)" => PlanTier::HalfYearly,
            "SmartDraft Premium (Yearly)" => PlanTier::Yearly,
            _ => PlanTier::Trial,
        }
    }

    fn limit(self) -> i64 {
        match self {
            PlanTier::Trial => TRIAL_LIMIT,
            PlanTier::Monthly => 1000,
            PlanTier::HalfYearly => 6000,
            PlanTier::Yearly => 12000,
        }
    }

    fn validity_days(self) -> Option<i64> {
        match self {
            PlanTier::Trial => None,
            PlanTier::Monthly => Some(30),
            PlanTier::HalfYearly => Some(180),
            PlanTier::Yearly => Some(365),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub tier: PlanTier,
    /// Maximum metered actions within the validity window
    pub limit: i64,
    /// None = non-expiring at the plan level
    pub validity: Option<Duration>,
}

impl Plan {
    /// Expiry counted from `now`, not from the original purchase.
    ///
    /// Callers that have an authoritative expiry from the provider or a webhook
    /// should prefer it over this value.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        self.validity.map(|v| now + v.num_seconds())
    }
}

/// Total: unknown variants fall back to the trial tier.
pub fn plan_for(variant: &str) -> Plan {
    let tier = PlanTier::from_variant(variant);
    Plan {
        tier,
        limit: tier.limit(),
        validity: tier
            .validity_days()
            .map(|days| Duration::seconds(days * SECONDS_PER_DAY)),
    }
}
