//! Tiered water charge calculation
//!
//! The pure functions here take the tiers and fee overrides as input so they
//! can be evaluated without a database. [`BillingCalculator`] loads those
//! inputs for a village and delegates.

use pamdes_shared::Village;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::tariff::TariffTier;

/// Administration fee charged per bill when the village has no override
pub const DEFAULT_ADMIN_FEE: i64 = 5_000;

/// Maintenance fee charged per bill when the village has no override
pub const DEFAULT_MAINTENANCE_FEE: i64 = 2_000;

/// Per-bill fees of a village
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageFees {
    pub admin_fee: i64,
    pub maintenance_fee: i64,
}

impl Default for VillageFees {
    fn default() -> Self {
        Self {
            admin_fee: DEFAULT_ADMIN_FEE,
            maintenance_fee: DEFAULT_MAINTENANCE_FEE,
        }
    }
}

impl VillageFees {
    pub fn resolve(admin_override: Option<i64>, maintenance_override: Option<i64>) -> Self {
        Self::resolve_with(Self::default(), admin_override, maintenance_override)
    }

    /// Resolve overrides against configured defaults
    pub fn resolve_with(
        defaults: VillageFees,
        admin_override: Option<i64>,
        maintenance_override: Option<i64>,
    ) -> Self {
        Self {
            admin_fee: admin_override.unwrap_or(defaults.admin_fee),
            maintenance_fee: maintenance_override.unwrap_or(defaults.maintenance_fee),
        }
    }
}

/// Units billed within one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCharge {
    pub tier_id: Uuid,
    pub usage_min: i32,
    pub usage_max: Option<i32>,
    pub units: i32,
    pub price_per_unit: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterCharge {
    pub total: i64,
    pub breakdown: Vec<TierCharge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillAmounts {
    pub water_charge: i64,
    pub admin_fee: i64,
    pub maintenance_fee: i64,
    pub total_amount: i64,
    pub breakdown: Vec<TierCharge>,
}

impl BillAmounts {
    /// The tier the usage finally landed in, recorded on the bill
    pub fn top_tier(&self) -> Option<Uuid> {
        self.breakdown.last().map(|c| c.tier_id)
    }
}

fn overflow() -> BillingError {
    BillingError::Validation("charge exceeds representable amount".to_string())
}

/// Progressive charge for `usage_m3` cubic metres.
///
/// Metered units are numbered `1..=usage_m3`. A tier bills the units whose
/// number falls inside it, so a `0-10` tier covers units 1 through 10.
pub fn compute_water_charge(usage_m3: i32, tiers: &[TariffTier]) -> BillingResult<WaterCharge> {
    let mut breakdown = Vec::new();
    let mut total: i64 = 0;

    if usage_m3 <= 0 {
        return Ok(WaterCharge { total, breakdown });
    }

    let mut ordered: Vec<&TariffTier> = tiers.iter().filter(|t| t.is_active).collect();
    ordered.sort_by_key(|t| t.usage_min);

    for tier in ordered {
        let first_unit = tier.usage_min.max(1);
        if first_unit > usage_m3 {
            break;
        }
        let last_unit = tier.usage_max.map_or(usage_m3, |max| max.min(usage_m3));
        let units = last_unit - first_unit + 1;
        if units <= 0 {
            continue;
        }

        let amount = i64::from(units)
            .checked_mul(tier.price_per_unit)
            .ok_or_else(overflow)?;
        total = total.checked_add(amount).ok_or_else(overflow)?;

        breakdown.push(TierCharge {
            tier_id: tier.id,
            usage_min: tier.usage_min,
            usage_max: tier.usage_max,
            units,
            price_per_unit: tier.price_per_unit,
            amount,
        });
    }

    Ok(WaterCharge { total, breakdown })
}

/// Water charge plus fees
pub fn compute_bill(
    usage_m3: i32,
    tiers: &[TariffTier],
    fees: VillageFees,
) -> BillingResult<BillAmounts> {
    let charge = compute_water_charge(usage_m3, tiers)?;

    let total_amount = charge
        .total
        .checked_add(fees.admin_fee)
        .and_then(|t| t.checked_add(fees.maintenance_fee))
        .ok_or_else(overflow)?;

    Ok(BillAmounts {
        water_charge: charge.total,
        admin_fee: fees.admin_fee,
        maintenance_fee: fees.maintenance_fee,
        total_amount,
        breakdown: charge.breakdown,
    })
}

/// Loads a village's tiers and fee overrides for the pure calculation
#[derive(Clone)]
pub struct BillingCalculator {
    pool: PgPool,
    default_fees: VillageFees,
}

impl BillingCalculator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_fees: VillageFees::default(),
        }
    }

    pub fn with_default_fees(mut self, fees: VillageFees) -> Self {
        self.default_fees = fees;
        self
    }

    pub async fn village_fees(&self, village_id: Uuid) -> BillingResult<VillageFees> {
        let village = sqlx::query_as::<_, Village>(
            r#"
            SELECT id, code, name, admin_fee, maintenance_fee, is_active, created_at
            FROM villages
            WHERE id = $1
            "#,
        )
        .bind(village_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("village {}", village_id)))?;

        Ok(VillageFees::resolve_with(
            self.default_fees,
            village.admin_fee,
            village.maintenance_fee,
        ))
    }

    pub async fn active_tiers(&self, village_id: Uuid) -> BillingResult<Vec<TariffTier>> {
        let tiers = sqlx::query_as::<_, TariffTier>(
            r#"
            SELECT id, village_id, usage_min, usage_max, price_per_m3, is_active
            FROM water_tariffs
            WHERE village_id = $1 AND is_active = TRUE
            ORDER BY usage_min ASC
            "#,
        )
        .bind(village_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tiers)
    }

    /// Preview of the bill a village would issue for `usage_m3`
    pub async fn calculate(&self, village_id: Uuid, usage_m3: i32) -> BillingResult<BillAmounts> {
        if usage_m3 < 0 {
            return Err(BillingError::Validation(
                "usage must be zero or greater".to_string(),
            ));
        }

        let fees = self.village_fees(village_id).await?;
        let tiers = self.active_tiers(village_id).await?;
        if tiers.is_empty() {
            tracing::warn!(village_id = %village_id, "Village has no active tariff ranges");
        }

        compute_bill(usage_m3, &tiers, fees)
    }
}
