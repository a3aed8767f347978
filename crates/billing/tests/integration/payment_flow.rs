use std::sync::atomic::Ordering;

use pamdes_billing::gateway::signature::callback_signature;
use pamdes_billing::{BillingError, BillingEventType, Transition};
use pamdes_shared::{BillStatus, PaymentMethod, PaymentStatus};
use time::{Duration, OffsetDateTime};

use crate::common::{create_customer, create_village, issue_bill, setup, PRIVATE_KEY};

fn signed_callback(merchant_ref: &str, status: &str, amount: i64) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&serde_json::json!({
        "reference": "T0001CB",
        "merchant_ref": merchant_ref,
        "payment_method": "QRIS",
        "total_amount": amount,
        "status": status,
        "paid_at": 1_717_200_000,
    }))
    .unwrap();
    let signature = callback_signature(PRIVATE_KEY, &body).unwrap();
    (body, signature)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_single_payment_settles_once() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 15).await;

    // 10 x 1000 + 5 x 1500 + default fees
    assert_eq!(bill.water_charge, 17_500);
    assert_eq!(bill.total_amount, 24_500);

    let checkout = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await
        .unwrap();
    assert_eq!(checkout.amount, 24_500);
    assert_eq!(checkout.bill_ids, vec![bill.id]);
    assert!(checkout.bundle_reference.is_none());

    let pending = h.billing.bills.get(village, bill.id).await.unwrap();
    assert_eq!(pending.transaction_ref.as_deref(), Some(checkout.merchant_ref.as_str()));

    // A second checkout for the same bill is refused while the first is open
    let again = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await;
    assert!(matches!(again, Err(BillingError::AlreadyPending(_))));

    let (body, signature) = signed_callback(&checkout.merchant_ref, "PAID", 24_500);
    let outcome = h
        .billing
        .reconciler
        .handle_callback(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome.transition, Transition::MarkCompleted);
    assert_eq!(outcome.status, PaymentStatus::Completed);
    assert_eq!(outcome.bill_ids, vec![bill.id]);

    let paid = h.billing.bills.get(village, bill.id).await.unwrap();
    assert_eq!(paid.status, BillStatus::Paid);
    assert!(paid.payment_date.is_some());
    // Settled bills keep the reference of the transaction that paid them
    assert_eq!(paid.transaction_ref.as_deref(), Some(checkout.merchant_ref.as_str()));

    // Gateways retry callbacks; the replay changes nothing
    let replay = h
        .billing
        .reconciler
        .handle_callback(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(replay.transition, Transition::AlreadyTerminal);
    assert!(replay.bill_ids.is_empty());

    let payment = h.billing.payments.get(checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_reference.as_deref(), Some("T0001CB"));

    let trail = h
        .billing
        .events
        .get_events_for_merchant_ref(&checkout.merchant_ref)
        .await
        .unwrap();
    let completed = trail
        .iter()
        .filter(|e| e.event_type == BillingEventType::PaymentCompleted.to_string())
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_bundle_covers_bills_and_blocks_overlap() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let january = issue_bill(&h, village, customer, 1, 5).await;
    let february = issue_bill(&h, village, customer, 2, 25).await;
    let march = issue_bill(&h, village, customer, 3, 12).await;

    let bundle = h
        .billing
        .bundles
        .create_bundle(village, customer, &[february.id, january.id], None, None, None)
        .await
        .unwrap();

    assert_eq!(bundle.amount, january.total_amount + february.total_amount);
    assert!(bundle.merchant_ref.starts_with("BDL-"));
    assert_eq!(bundle.bundle_reference.as_deref(), Some(bundle.merchant_ref.as_str()));

    let lines = h.billing.payments.lines(bundle.payment_id).await.unwrap();
    assert_eq!(lines.len(), 2);

    // Overlapping bundle and single checkout are both refused
    let overlap = h
        .billing
        .bundles
        .create_bundle(village, customer, &[january.id, march.id], None, None, None)
        .await;
    assert!(matches!(overlap, Err(BillingError::AlreadyPending(_))));

    let single = h
        .billing
        .checkout
        .create_payment(village, february.id, None, None, None)
        .await;
    assert!(matches!(single, Err(BillingError::AlreadyPending(_))));

    // The refused bundle left March untouched
    let march_now = h.billing.bills.get(village, march.id).await.unwrap();
    assert!(march_now.transaction_ref.is_none());

    let (body, signature) = signed_callback(&bundle.merchant_ref, "PAID", bundle.amount);
    let outcome = h
        .billing
        .reconciler
        .handle_callback(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome.bill_ids.len(), 2);

    for id in [january.id, february.id] {
        let bill = h.billing.bills.get(village, id).await.unwrap();
        assert_eq!(bill.status, BillStatus::Paid);
    }
    let march_now = h.billing.bills.get(village, march.id).await.unwrap();
    assert_eq!(march_now.status, BillStatus::Unpaid);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_bundle_rejects_foreign_bill() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let alice = create_customer(&h.pool, village).await;
    let bob = create_customer(&h.pool, village).await;
    let mine = issue_bill(&h, village, alice, 1, 8).await;
    let theirs = issue_bill(&h, village, bob, 1, 8).await;

    let result = h
        .billing
        .bundles
        .create_bundle(village, alice, &[mine.id, theirs.id], None, None, None)
        .await;
    assert!(matches!(result, Err(BillingError::Validation(_))));

    let untouched = h.billing.bills.get(village, mine.id).await.unwrap();
    assert!(untouched.transaction_ref.is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_callback_returns_bundle_bills() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let a = issue_bill(&h, village, customer, 1, 12).await;
    let b = issue_bill(&h, village, customer, 2, 30).await;

    let bundle = h
        .billing
        .bundles
        .create_bundle(village, customer, &[a.id, b.id], None, None, None)
        .await
        .unwrap();

    let (body, signature) = signed_callback(&bundle.merchant_ref, "EXPIRED", bundle.amount);
    let outcome = h
        .billing
        .reconciler
        .handle_callback(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome.transition, Transition::MarkExpired);
    assert_eq!(outcome.status, PaymentStatus::Expired);

    for id in [a.id, b.id] {
        let bill = h.billing.bills.get(village, id).await.unwrap();
        assert_eq!(bill.status, BillStatus::Unpaid);
        assert!(bill.transaction_ref.is_none());
    }

    let completed: Vec<_> = h
        .billing
        .payments
        .list_for_customer(customer, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .collect();
    assert!(completed.is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_gateway_refusal_releases_bill() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 10).await;

    h.gateway.refuse.store(true, Ordering::SeqCst);
    let refused = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await;
    assert!(matches!(refused, Err(BillingError::Gateway(_))));

    let released = h.billing.bills.get(village, bill.id).await.unwrap();
    assert!(released.transaction_ref.is_none());
    assert!(h
        .billing
        .payments
        .list_for_customer(customer, 10)
        .await
        .unwrap()
        .is_empty());

    let events = h.billing.events.get_events_for_village(village, 20).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == BillingEventType::PaymentCreateFailed.to_string()));

    // The customer can try again once the gateway recovers
    h.gateway.refuse.store(false, Ordering::SeqCst);
    let retry = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await
        .unwrap();
    assert_eq!(retry.bill_ids, vec![bill.id]);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_forged_callback_changes_nothing() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 10).await;

    let checkout = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await
        .unwrap();

    let (body, _) = signed_callback(&checkout.merchant_ref, "PAID", checkout.amount);
    let forged = callback_signature("someone-else", &body).unwrap();
    let result = h.billing.reconciler.handle_callback(&body, Some(&forged)).await;
    assert!(matches!(result, Err(BillingError::SignatureInvalid)));

    let payment = h.billing.payments.get(checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    let bill = h.billing.bills.get(village, bill.id).await.unwrap();
    assert_eq!(bill.status, BillStatus::Unpaid);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expiry_sweep_frees_bills() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let a = issue_bill(&h, village, customer, 1, 4).await;
    let b = issue_bill(&h, village, customer, 2, 4).await;

    let bundle = h
        .billing
        .bundles
        .create_bundle(village, customer, &[a.id, b.id], None, None, None)
        .await
        .unwrap();

    let later = OffsetDateTime::now_utc() + Duration::hours(3);
    let expired = h.billing.reconciler.expire_stale(later).await.unwrap();
    assert!(expired >= 1);

    let payment = h.billing.payments.get(bundle.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Expired);

    for id in [a.id, b.id] {
        let bill = h.billing.bills.get(village, id).await.unwrap();
        assert_eq!(bill.status, BillStatus::Unpaid);
        assert!(bill.transaction_ref.is_none());
    }

    // A late PAID for the expired bundle is recorded but not applied
    let (body, signature) = signed_callback(&bundle.merchant_ref, "PAID", bundle.amount);
    let late = h
        .billing
        .reconciler
        .handle_callback(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(late.transition, Transition::AlreadyTerminal);

    // Freed bills can be paid again
    h.billing
        .checkout
        .create_payment(village, a.id, None, None, None)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_manual_collection() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 10).await;
    let collector = uuid::Uuid::new_v4();

    let (paid, payment) = h
        .billing
        .bills
        .mark_as_paid_manually(village, bill.id, collector, PaymentMethod::Cash)
        .await
        .unwrap();
    assert_eq!(paid.status, BillStatus::Paid);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.collector_id, Some(collector));
    assert!(payment.merchant_ref.starts_with("MAN-"));

    let twice = h
        .billing
        .bills
        .mark_as_paid_manually(village, bill.id, collector, PaymentMethod::Cash)
        .await;
    assert!(matches!(twice, Err(BillingError::Conflict(_))));

    let qris = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await;
    assert!(matches!(qris, Err(BillingError::Conflict(_))));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_sync_status_applies_gateway_state() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 10).await;

    let checkout = h
        .billing
        .checkout
        .create_payment(village, bill.id, None, None, None)
        .await
        .unwrap();

    // The fake gateway reports every polled transaction as PAID
    let outcome = h
        .billing
        .reconciler
        .sync_status(village, &checkout.merchant_ref)
        .await
        .unwrap();
    assert_eq!(outcome.status, PaymentStatus::Completed);

    let paid = h.billing.bills.get(village, bill.id).await.unwrap();
    assert_eq!(paid.status, BillStatus::Paid);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_bill_generation_is_idempotent() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 21).await;

    let again = h
        .billing
        .bills
        .generate_for_usage(village, bill.usage_id, None)
        .await
        .unwrap();
    assert_eq!(again.id, bill.id);

    // 10 x 1000 + 10 x 1500 + 1 x 2000, billed at the top tier reached
    assert_eq!(bill.water_charge, 27_000);
    assert!(bill.tariff_id.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_inconsistent_meter_reading_is_not_billed() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;

    let period: (uuid::Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO billing_periods (village_id, year, month, due_date)
        VALUES ($1, 2024, 7, '2099-01-20')
        RETURNING id
        "#,
    )
    .bind(village)
    .fetch_one(&h.pool)
    .await
    .unwrap();

    // 100 -> 110 recorded as 15 m3
    let usage: (uuid::Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO water_usages (customer_id, billing_period_id, initial_meter, final_meter, total_usage_m3)
        VALUES ($1, $2, 100, 110, 15)
        RETURNING id
        "#,
    )
    .bind(customer)
    .bind(period.0)
    .fetch_one(&h.pool)
    .await
    .unwrap();

    let err = h
        .billing
        .bills
        .generate_for_usage(village, usage.0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let bills = h.billing.bills.list_for_customer(customer, None).await.unwrap();
    assert!(bills.is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_village_credentials_take_priority() {
    use pamdes_billing::{CredentialResolver, CredentialStore, GatewayMode, TripayCredentials};

    let h = setup().await;
    let village = create_village(&h.pool).await;
    let store = CredentialStore::from_hex_key(
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
    )
    .unwrap();
    let platform = TripayCredentials {
        api_key: "platform-api".to_string(),
        private_key: "platform-private".to_string(),
        merchant_code: "P0001".to_string(),
        mode: GatewayMode::Sandbox,
    };
    let resolver = CredentialResolver::new(h.pool.clone(), Some(store), Some(platform));

    let before = resolver.resolve_credentials(village).await.unwrap();
    assert_eq!(before.merchant_code, "P0001");

    let own = TripayCredentials {
        api_key: "village-api".to_string(),
        private_key: "village-private".to_string(),
        merchant_code: "V0001".to_string(),
        mode: GatewayMode::Production,
    };
    resolver.store_credentials(village, &own).await.unwrap();

    let stored: (String,) = sqlx::query_as(
        "SELECT private_key_encrypted FROM village_gateway_settings WHERE village_id = $1",
    )
    .bind(village)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_ne!(stored.0, "village-private");

    let after = resolver.resolve_credentials(village).await.unwrap();
    assert_eq!(after.merchant_code, "V0001");
    assert_eq!(after.private_key, "village-private");
    assert_eq!(after.mode, GatewayMode::Production);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_inactive_customer_cannot_pay_with_supplied_contact() {
    use pamdes_billing::CustomerInfo;

    let h = setup().await;
    let village = create_village(&h.pool).await;
    let customer = create_customer(&h.pool, village).await;
    let bill = issue_bill(&h, village, customer, 1, 12).await;

    sqlx::query("UPDATE customers SET is_active = FALSE WHERE id = $1")
        .bind(customer)
        .execute(&h.pool)
        .await
        .unwrap();

    let contact = CustomerInfo {
        name: "Pak Budi".to_string(),
        email: "other@example.com".to_string(),
        phone: "089999999999".to_string(),
    };

    let err = h
        .billing
        .checkout
        .create_payment(village, bill.id, Some(contact.clone()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let err = h
        .billing
        .bundles
        .create_bundle(village, customer, &[bill.id], Some(contact), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
    let bill = h.billing.bills.get(village, bill.id).await.unwrap();
    assert!(bill.transaction_ref.is_none());
    assert_eq!(bill.status, BillStatus::Unpaid);
}
