//! Role policy table
//!
//! Capability checks are a single lookup evaluated once per request. The table
//! is explicit per role; there is no role hierarchy.

use serde::{Deserialize, Serialize};

/// Role of the actor issuing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    VillageAdmin,
    Collector,
    Operator,
    Customer,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super_admin" => Ok(Self::SuperAdmin),
            "village_admin" => Ok(Self::VillageAdmin),
            "collector" => Ok(Self::Collector),
            "operator" => Ok(Self::Operator),
            "customer" => Ok(Self::Customer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SuperAdmin => "super_admin",
            Self::VillageAdmin => "village_admin",
            Self::Collector => "collector",
            Self::Operator => "operator",
            Self::Customer => "customer",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    /// Record a manual (cash/transfer) collection
    Collect,
    /// Start a gateway payment
    Pay,
    /// Force a gateway status poll
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Tariff,
    Bill,
    Payment,
    /// A village's own Tripay merchant credentials
    GatewaySettings,
}

/// Whether `role` may perform `action` on `resource`
pub fn can(role: Role, action: Action, resource: Resource) -> bool {
    use Action::*;
    use Resource::*;

    match role {
        Role::SuperAdmin => true,
        Role::VillageAdmin => !matches!((action, resource), (Pay, _)),
        Role::Operator => matches!(
            (action, resource),
            (View, _) | (Create, Bill) | (Reconcile, Payment)
        ),
        Role::Collector => matches!(
            (action, resource),
            (View, Bill) | (View, Payment) | (Collect, Bill)
        ),
        Role::Customer => matches!(
            (action, resource),
            (View, Bill) | (View, Payment) | (Pay, Bill) | (Pay, Payment)
        ),
    }
}
