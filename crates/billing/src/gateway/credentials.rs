//! Per-village gateway credentials
//!
//! Villages may run their own Tripay merchant account. Their API and private
//! keys are stored AES-256-GCM encrypted in `village_gateway_settings` and
//! decrypted only when a gateway call needs them. Villages without a row use
//! the platform credentials from configuration.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

use super::{GatewayMode, TripayCredentials};

/// Encrypts and decrypts stored gateway secrets
#[derive(Clone)]
pub struct CredentialStore {
    cipher: Aes256Gcm,
}

impl CredentialStore {
    /// Build from a 32-byte key given as 64 hex characters
    pub fn from_hex_key(hex_key: &str) -> BillingResult<Self> {
        let key = hex::decode(hex_key.trim()).map_err(|_| {
            BillingError::Config("CREDENTIALS_ENCRYPTION_KEY must be hex".to_string())
        })?;
        if key.len() != 32 {
            return Err(BillingError::Config(
                "CREDENTIALS_ENCRYPTION_KEY must be 64 hex characters".to_string(),
            ));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| BillingError::Config("invalid encryption key".to_string()))?;
        Ok(Self { cipher })
    }

    /// Returns `(ciphertext, nonce)`, both base64
    pub fn encrypt(&self, plaintext: &str) -> BillingResult<(String, String)> {
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| BillingError::Internal("credential encryption failed".to_string()))?;

        Ok((BASE64.encode(ciphertext), BASE64.encode(nonce_bytes)))
    }

    pub fn decrypt(&self, ciphertext_b64: &str, nonce_b64: &str) -> BillingResult<String> {
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| BillingError::Config("stored credential is not base64".to_string()))?;
        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|_| BillingError::Config("stored nonce is not base64".to_string()))?;
        if nonce_bytes.len() != 12 {
            return Err(BillingError::Config("stored nonce has wrong length".to_string()));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| BillingError::Config("stored credential cannot be decrypted".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| BillingError::Config("stored credential is not UTF-8".to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct GatewaySettingsRow {
    merchant_code: String,
    api_key_encrypted: String,
    api_key_nonce: String,
    private_key_encrypted: String,
    private_key_nonce: String,
    is_production: bool,
}

/// Looks up the credentials a village's gateway calls should use
#[derive(Clone)]
pub struct CredentialResolver {
    pool: PgPool,
    store: Option<CredentialStore>,
    platform: Option<TripayCredentials>,
}

impl CredentialResolver {
    pub fn new(
        pool: PgPool,
        store: Option<CredentialStore>,
        platform: Option<TripayCredentials>,
    ) -> Self {
        Self {
            pool,
            store,
            platform,
        }
    }

    /// Village row first, then the platform default
    pub async fn resolve_credentials(&self, village_id: Uuid) -> BillingResult<TripayCredentials> {
        let row = sqlx::query_as::<_, GatewaySettingsRow>(
            r#"
            SELECT merchant_code, api_key_encrypted, api_key_nonce,
                   private_key_encrypted, private_key_nonce, is_production
            FROM village_gateway_settings
            WHERE village_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(village_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let store = self.store.as_ref().ok_or_else(|| {
                BillingError::Config(
                    "village has stored gateway credentials but no encryption key is configured"
                        .to_string(),
                )
            })?;

            tracing::debug!(village_id = %village_id, "Using village gateway credentials");

            return Ok(TripayCredentials {
                api_key: store.decrypt(&row.api_key_encrypted, &row.api_key_nonce)?,
                private_key: store.decrypt(&row.private_key_encrypted, &row.private_key_nonce)?,
                merchant_code: row.merchant_code,
                mode: if row.is_production {
                    GatewayMode::Production
                } else {
                    GatewayMode::Sandbox
                },
            });
        }

        self.platform.clone().ok_or_else(|| {
            BillingError::Config(format!(
                "no gateway credentials for village {} and no platform default",
                village_id
            ))
        })
    }

    /// Store (or replace) a village's credentials, encrypting the secrets
    pub async fn store_credentials(
        &self,
        village_id: Uuid,
        credentials: &TripayCredentials,
    ) -> BillingResult<()> {
        let store = self.store.as_ref().ok_or_else(|| {
            BillingError::Config("CREDENTIALS_ENCRYPTION_KEY is not configured".to_string())
        })?;

        let (api_key, api_nonce) = store.encrypt(&credentials.api_key)?;
        let (private_key, private_nonce) = store.encrypt(&credentials.private_key)?;

        sqlx::query(
            r#"
            INSERT INTO village_gateway_settings (
                village_id, merchant_code, api_key_encrypted, api_key_nonce,
                private_key_encrypted, private_key_nonce, is_production, is_active, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW())
            ON CONFLICT (village_id) DO UPDATE SET
                merchant_code = EXCLUDED.merchant_code,
                api_key_encrypted = EXCLUDED.api_key_encrypted,
                api_key_nonce = EXCLUDED.api_key_nonce,
                private_key_encrypted = EXCLUDED.private_key_encrypted,
                private_key_nonce = EXCLUDED.private_key_nonce,
                is_production = EXCLUDED.is_production,
                is_active = TRUE,
                updated_at = NOW()
            "#,
        )
        .bind(village_id)
        .bind(&credentials.merchant_code)
        .bind(api_key)
        .bind(api_nonce)
        .bind(private_key)
        .bind(private_nonce)
        .bind(credentials.mode == GatewayMode::Production)
        .execute(&self.pool)
        .await?;

        tracing::info!(village_id = %village_id, merchant_code = %credentials.merchant_code, "Village gateway credentials stored");
        Ok(())
    }
}
