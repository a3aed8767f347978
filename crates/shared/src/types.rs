//! Common types used across PAMDes

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PamdesError;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle state of a water bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl Default for BillStatus {
    fn default() -> Self {
        Self::Unpaid
    }
}

impl BillStatus {
    /// Bills in this state may still be collected
    pub fn is_payable(&self) -> bool {
        matches!(self, Self::Unpaid | Self::Overdue)
    }
}

impl std::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "unpaid"),
            Self::Paid => write!(f, "paid"),
            Self::Overdue => write!(f, "overdue"),
        }
    }
}

impl std::str::FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            _ => Err(format!("Invalid bill status: {}", s)),
        }
    }
}

/// Lifecycle state of a payment (single bill or bundle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Expired,
    Failed,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PaymentStatus {
    /// Terminal payments accept no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

/// How a payment was (or is being) collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Tripay QRIS checkout
    Qris,
    /// Cash handed to a collector
    Cash,
    /// Bank transfer confirmed by an admin
    Transfer,
}

impl Default for PaymentMethod {
    fn default() -> Self {
        Self::Cash
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qris => write!(f, "qris"),
            Self::Cash => write!(f, "cash"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

// =============================================================================
// Collaborator records
// =============================================================================

/// Village (tenant). Fee overrides are NULL when the village uses the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Village {
    pub id: Uuid,
    /// Short uppercase code embedded in merchant references (e.g. "SKJ")
    pub code: String,
    pub name: String,
    pub admin_fee: Option<i64>,
    pub maintenance_fee: Option<i64>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

/// Customer (household connection) within a village
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub village_id: Uuid,
    pub customer_code: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
}

/// Monthly billing period of a village
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub id: Uuid,
    pub village_id: Uuid,
    pub year: i32,
    pub month: i32,
    pub due_date: time::Date,
}

impl BillingPeriod {
    /// `YYYYMM` form used in merchant references
    pub fn year_month(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

/// Meter reading for one customer in one billing period
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaterUsage {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub billing_period_id: Uuid,
    pub initial_meter: i32,
    pub final_meter: i32,
    pub total_usage_m3: i32,
}

impl WaterUsage {
    /// Meter readings must be non-decreasing and agree with the recorded usage
    pub fn validate(&self) -> Result<(), PamdesError> {
        if self.final_meter < self.initial_meter {
            return Err(PamdesError::InvalidValue(format!(
                "final meter {} is below initial meter {}",
                self.final_meter, self.initial_meter
            )));
        }
        if self.total_usage_m3 != self.final_meter - self.initial_meter {
            return Err(PamdesError::Validation(format!(
                "usage {} m3 does not match meter readings {}..{}",
                self.total_usage_m3, self.initial_meter, self.final_meter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bill_status_round_trip_strings() {
        assert_eq!("OVERDUE".parse::<BillStatus>(), Ok(BillStatus::Overdue));
        assert_eq!(BillStatus::Unpaid.to_string(), "unpaid");
        assert!("settled".parse::<BillStatus>().is_err());
    }

    #[test]
    fn test_bill_status_payable() {
        assert!(BillStatus::Unpaid.is_payable());
        assert!(BillStatus::Overdue.is_payable());
        assert!(!BillStatus::Paid.is_payable());
    }

    #[test]
    fn test_payment_status_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    fn reading(initial: i32, final_meter: i32, total: i32) -> WaterUsage {
        WaterUsage {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            billing_period_id: Uuid::new_v4(),
            initial_meter: initial,
            final_meter,
            total_usage_m3: total,
        }
    }

    #[test]
    fn test_water_usage_validation() {
        assert!(reading(100, 115, 15).validate().is_ok());
        assert!(reading(100, 100, 0).validate().is_ok());
        assert!(matches!(
            reading(120, 100, 0).validate(),
            Err(PamdesError::InvalidValue(_))
        ));
        assert!(matches!(
            reading(100, 115, 20).validate(),
            Err(PamdesError::Validation(_))
        ));
    }

    #[test]
    fn test_billing_period_year_month() {
        let period = BillingPeriod {
            id: Uuid::new_v4(),
            village_id: Uuid::new_v4(),
            year: 2024,
            month: 3,
            due_date: time::macros::date!(2024 - 03 - 20),
        };
        assert_eq!(period.year_month(), "202403");
    }
}
