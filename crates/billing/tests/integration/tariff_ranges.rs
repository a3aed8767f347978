use pamdes_billing::{BillingError, RangeEdit, TariffTable};
use uuid::Uuid;

use crate::common::{create_village, setup};

async fn assert_partition(h: &crate::common::Harness, village: Uuid) -> Vec<(i32, Option<i32>, i64)> {
    let tiers = h.billing.tariffs.list_ranges(village).await.unwrap();
    let table = TariffTable::new(village, tiers.clone());
    assert_eq!(table.partition_problems(), Vec::<String>::new());
    tiers
        .into_iter()
        .map(|t| (t.usage_min, t.usage_max, t.price_per_unit))
        .collect()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_edits_keep_table_contiguous() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let tiers = h.billing.tariffs.list_ranges(village).await.unwrap();
    let (first, second, last) = (tiers[0].id, tiers[1].id, tiers[2].id);

    h.billing
        .tariffs
        .update_range(
            village,
            first,
            RangeEdit {
                new_max: Some(12),
                ..RangeEdit::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        assert_partition(&h, village).await,
        vec![(0, Some(12), 1000), (13, Some(20), 1500), (21, None, 2000)]
    );

    h.billing
        .tariffs
        .update_range(
            village,
            last,
            RangeEdit {
                new_min: Some(30),
                new_price: Some(2500),
                ..RangeEdit::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        assert_partition(&h, village).await,
        vec![(0, Some(12), 1000), (13, Some(29), 1500), (30, None, 2500)]
    );

    h.billing
        .tariffs
        .delete_range(village, second, None)
        .await
        .unwrap();
    assert_eq!(
        assert_partition(&h, village).await,
        vec![(0, Some(29), 1000), (30, None, 2500)]
    );

    // Billing uses the edited table: 29 x 1000 + 1 x 2500
    let amounts = h.billing.calculator.calculate(village, 30).await.unwrap();
    assert_eq!(amounts.water_charge, 31_500);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rejected_edit_leaves_table_unchanged() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let before = assert_partition(&h, village).await;
    let tiers = h.billing.tariffs.list_ranges(village).await.unwrap();

    let swallow_next = h
        .billing
        .tariffs
        .update_range(
            village,
            tiers[0].id,
            RangeEdit {
                new_max: Some(20),
                ..RangeEdit::default()
            },
            None,
        )
        .await;
    assert!(matches!(swallow_next, Err(BillingError::Validation(_))));

    let inside = h.billing.tariffs.create_range(village, 15, 1200, None).await;
    assert!(matches!(inside, Err(BillingError::Validation(_))));

    let foreign = h
        .billing
        .tariffs
        .delete_range(village, Uuid::new_v4(), None)
        .await;
    assert!(matches!(foreign, Err(BillingError::NotFound(_))));

    assert_eq!(assert_partition(&h, village).await, before);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_first_range_of_empty_village() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    for tier in h.billing.tariffs.list_ranges(village).await.unwrap() {
        h.billing
            .tariffs
            .delete_range(village, tier.id, None)
            .await
            .unwrap();
    }
    assert!(h.billing.tariffs.list_ranges(village).await.unwrap().is_empty());

    let created = h
        .billing
        .tariffs
        .create_range(village, 0, 3000, None)
        .await
        .unwrap();
    assert!(created.is_last_range());
    assert_eq!(assert_partition(&h, village).await, vec![(0, None, 3000)]);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_edits_serialize() {
    let h = setup().await;
    let village = create_village(&h.pool).await;
    let tiers = h.billing.tariffs.list_ranges(village).await.unwrap();

    let widen_first = h.billing.tariffs.update_range(
        village,
        tiers[0].id,
        RangeEdit {
            new_max: Some(15),
            ..RangeEdit::default()
        },
        None,
    );
    let move_last = h.billing.tariffs.update_range(
        village,
        tiers[2].id,
        RangeEdit {
            new_min: Some(40),
            ..RangeEdit::default()
        },
        None,
    );

    let (a, b) = tokio::join!(widen_first, move_last);
    a.unwrap();
    b.unwrap();

    assert_eq!(
        assert_partition(&h, village).await,
        vec![(0, Some(15), 1000), (16, Some(39), 1500), (40, None, 2000)]
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_village_is_not_found() {
    let h = setup().await;
    let result = h
        .billing
        .tariffs
        .create_range(Uuid::new_v4(), 0, 1000, None)
        .await;
    assert!(matches!(result, Err(BillingError::NotFound(_))));
}
