//! Plan catalog

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a catalog plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Lite,
    Pro,
    Geant,
    Grande,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Lite => "lite",
            PlanId::Pro => "pro",
            PlanId::Geant => "geant",
            PlanId::Grande => "grande",
        }
    }

    /// Catalog entry of this plan
    pub fn plan(&self) -> &'static Plan {
        match self {
            PlanId::Lite => &PLANS[0],
            PlanId::Pro => &PLANS[1],
            PlanId::Geant => &PLANS[2],
            PlanId::Grande => &PLANS[3],
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lite" => Ok(PlanId::Lite),
            "pro" => Ok(PlanId::Pro),
            "geant" => Ok(PlanId::Geant),
            "grande" => Ok(PlanId::Grande),
            other => Err(format!("Unknown plan: {}", other)),
        }
    }
}

/// Account management plan offered to users
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
    pub price: &'static str,
}

const ADVANCED_FEATURES: &[&str] = &["Priority support", "Weekly reports", "Dedicated assistant"];

/// The plan catalog, in display order
pub const PLANS: [Plan; 4] = [
    Plan {
        id: PlanId::Lite,
        name: "Lite Plan",
        description: "Basic account management",
        features: &["Email support", "Monthly reports"],
        price: "$50/One-time Payment",
    },
    Plan {
        id: PlanId::Pro,
        name: "Pro Plan",
        description: "Advanced account management",
        features: ADVANCED_FEATURES,
        price: "$100/One-time Payment",
    },
    Plan {
        id: PlanId::Geant,
        name: "Geant Plan",
        description: "Advanced account management",
        features: ADVANCED_FEATURES,
        price: "$300/One-time Payment",
    },
    Plan {
        id: PlanId::Grande,
        name: "Grande Plan",
        description: "Advanced account management",
        features: ADVANCED_FEATURES,
        price: "contact!!",
    },
];
