//! Merchant reference generation
//!
//! Single bill: `{VILLAGE}-{YYYYMM}-{bill8}-{unix}{nonce}`
//! Bundle:      `BDL-{VILLAGE}-{unix}-{nonce}`
//! Manual:      `MAN-{VILLAGE}-{unix}-{nonce}` (cash or transfer, never sent to Tripay)

use rand::Rng;
use time::OffsetDateTime;
use uuid::Uuid;

pub const BUNDLE_PREFIX: &str = "BDL";

pub const MANUAL_PREFIX: &str = "MAN";

fn nonce() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

fn village_part(village_code: &str) -> String {
    village_code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

pub fn bill_merchant_ref(
    village_code: &str,
    year_month: &str,
    bill_id: Uuid,
    now: OffsetDateTime,
) -> String {
    let short = bill_id.simple().to_string();
    format!(
        "{}-{}-{}-{}{}",
        village_part(village_code),
        year_month,
        &short[..8],
        now.unix_timestamp(),
        nonce()
    )
}

/// Bundle reference, also used as the bundle's merchant ref
pub fn bundle_reference(village_code: &str, now: OffsetDateTime) -> String {
    format!(
        "{}-{}-{}-{}",
        BUNDLE_PREFIX,
        village_part(village_code),
        now.unix_timestamp(),
        nonce()
    )
}

pub fn manual_reference(village_code: &str, now: OffsetDateTime) -> String {
    format!(
        "{}-{}-{}-{}",
        MANUAL_PREFIX,
        village_part(village_code),
        now.unix_timestamp(),
        nonce()
    )
}
