//! Tripay request and callback signatures (HMAC-SHA256, hex encoded)

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

use super::CallbackPayload;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(key: &str, message: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| BillingError::Internal("invalid HMAC key".to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature sent with a transaction request
pub fn transaction_signature(
    private_key: &str,
    merchant_code: &str,
    merchant_ref: &str,
    amount: i64,
) -> BillingResult<String> {
    let message = format!("{}{}{}", merchant_code, merchant_ref, amount);
    hmac_hex(private_key, message.as_bytes())
}

/// Expected `X-Callback-Signature` for a raw callback body
pub fn callback_signature(private_key: &str, raw_body: &[u8]) -> BillingResult<String> {
    hmac_hex(private_key, raw_body)
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let provided = provided.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Verify a callback.
///
/// With a header signature the raw body is authenticated. Without one, the
/// payload's own `signature` field must match the transaction signature
/// recomputed from `merchant_code`, `merchant_ref` and the reported amount.
pub fn verify_callback(
    private_key: &str,
    merchant_code: &str,
    payload: &CallbackPayload,
    raw_body: &[u8],
    header_signature: Option<&str>,
) -> BillingResult<()> {
    let valid = match header_signature {
        Some(header) => {
            let expected = callback_signature(private_key, raw_body)?;
            constant_time_eq(&expected, header)
        }
        None => {
            let (Some(provided), Some(amount)) =
                (payload.signature.as_deref(), payload.reported_amount())
            else {
                return Err(BillingError::SignatureInvalid);
            };
            let expected =
                transaction_signature(private_key, merchant_code, &payload.merchant_ref, amount)?;
            constant_time_eq(&expected, provided)
        }
    };

    if valid {
        Ok(())
    } else {
        tracing::warn!(
            merchant_ref = %payload.merchant_ref,
            header = header_signature.is_some(),
            "Callback signature mismatch"
        );
        Err(BillingError::SignatureInvalid)
    }
}
