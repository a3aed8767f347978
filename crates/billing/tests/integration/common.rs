use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pamdes_billing::gateway::{GatewayTransaction, TransactionRequest};
use pamdes_billing::{
    BillingError, BillingResult, BillingService, BillingSettings, GatewayStatus, PaymentGateway,
    TripayConfig, TripayCredentials, VillageFees,
};
use sqlx::PgPool;
use time::macros::date;
use uuid::Uuid;

pub const PRIVATE_KEY: &str = "test-private-key";
pub const MERCHANT_CODE: &str = "T0001";

/// In-memory stand-in for Tripay
#[derive(Default)]
pub struct FakeGateway {
    pub refuse: AtomicBool,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<TransactionRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        _credentials: &TripayCredentials,
        request: &TransactionRequest,
    ) -> BillingResult<GatewayTransaction> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("channel QRIS is not active".to_string()));
        }

        Ok(GatewayTransaction {
            reference: format!("T{}{:05}", MERCHANT_CODE, n),
            merchant_ref: Some(request.merchant_ref.clone()),
            checkout_url: Some(format!("https://tripay.test/checkout/{}", n)),
            status: GatewayStatus::Unpaid,
            amount: Some(request.amount),
            expires_at: Some(request.expires_at),
            raw: serde_json::json!({ "merchant_ref": request.merchant_ref }),
        })
    }

    async fn transaction_detail(
        &self,
        _credentials: &TripayCredentials,
        reference: &str,
    ) -> BillingResult<GatewayTransaction> {
        Ok(GatewayTransaction {
            reference: reference.to_string(),
            merchant_ref: None,
            checkout_url: None,
            status: GatewayStatus::Paid,
            amount: None,
            expires_at: None,
            raw: serde_json::Value::Null,
        })
    }
}

pub struct Harness {
    pub pool: PgPool,
    pub billing: BillingService,
    pub gateway: Arc<FakeGateway>,
}

pub async fn setup() -> Harness {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let settings = BillingSettings {
        tripay: TripayConfig {
            api_key: Some("test-api-key".to_string()),
            private_key: Some(PRIVATE_KEY.to_string()),
            merchant_code: Some(MERCHANT_CODE.to_string()),
            ..TripayConfig::default()
        },
        credentials_key: None,
        default_fees: VillageFees::default(),
    };

    let gateway = Arc::new(FakeGateway::default());
    let billing = BillingService::with_gateway(settings, pool.clone(), gateway.clone())
        .expect("Failed to build billing service");

    Harness {
        pool,
        billing,
        gateway,
    }
}

/// Create a village with the tiers 0-10 @ 1000, 11-20 @ 1500, 21+ @ 2000
pub async fn create_village(pool: &PgPool) -> Uuid {
    let village_id = Uuid::new_v4();
    let code = format!("V{}", &village_id.simple().to_string()[..6].to_uppercase());

    sqlx::query("INSERT INTO villages (id, code, name) VALUES ($1, $2, $3)")
        .bind(village_id)
        .bind(&code)
        .bind(format!("Desa {}", code))
        .execute(pool)
        .await
        .unwrap();

    for (min, max, price) in [(0, Some(10), 1000_i64), (11, Some(20), 1500), (21, None, 2000)] {
        sqlx::query(
            "INSERT INTO water_tariffs (village_id, usage_min, usage_max, price_per_m3) VALUES ($1, $2, $3, $4)",
        )
        .bind(village_id)
        .bind(min)
        .bind(max)
        .bind(price)
        .execute(pool)
        .await
        .unwrap();
    }

    village_id
}

pub async fn create_customer(pool: &PgPool, village_id: Uuid) -> Uuid {
    let customer_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO customers (id, village_id, customer_code, name, email, phone)
        VALUES ($1, $2, $3, 'Pak Budi', 'budi@example.com', '081234567890')
        "#,
    )
    .bind(customer_id)
    .bind(village_id)
    .bind(customer_id.simple().to_string())
    .execute(pool)
    .await
    .unwrap();
    customer_id
}

/// Record a meter reading for the given month and issue its bill
pub async fn issue_bill(
    h: &Harness,
    village_id: Uuid,
    customer_id: Uuid,
    month: i32,
    usage_m3: i32,
) -> pamdes_billing::Bill {
    let period: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO billing_periods (village_id, year, month, due_date)
        VALUES ($1, 2024, $2, $3)
        ON CONFLICT (village_id, year, month) DO UPDATE SET due_date = EXCLUDED.due_date
        RETURNING id
        "#,
    )
    .bind(village_id)
    .bind(month)
    .bind(date!(2099 - 01 - 20))
    .fetch_one(&h.pool)
    .await
    .unwrap();

    let usage: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO water_usages (customer_id, billing_period_id, initial_meter, final_meter, total_usage_m3)
        VALUES ($1, $2, 100, $3, $4)
        RETURNING id
        "#,
    )
    .bind(customer_id)
    .bind(period.0)
    .bind(100 + usage_m3)
    .bind(usage_m3)
    .fetch_one(&h.pool)
    .await
    .unwrap();

    h.billing
        .bills
        .generate_for_usage(village_id, usage.0, None)
        .await
        .unwrap()
}
