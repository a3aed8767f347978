//! Progressive water tariff ranges
//!
//! Each village owns an ordered set of usage tiers. Tiers are contiguous and
//! non-overlapping, bounds are inclusive integers, and only the tier with the
//! greatest minimum may be unbounded.
//!
//! Mutations are computed by [`TariffTable`] as a pure edit over the locked
//! tiers and returned as a list of [`TierWrite`]s, which
//! [`TariffRangeService`] applies inside the same transaction that holds the
//! row locks. Two edits for the same village therefore never compute their
//! neighbour boundaries from stale rows.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};

/// One usage tier of a village tariff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TariffTier {
    pub id: Uuid,
    pub village_id: Uuid,
    pub usage_min: i32,
    /// `None` marks the unbounded last tier
    pub usage_max: Option<i32>,
    /// Price per cubic metre in minor currency units
    #[sqlx(rename = "price_per_m3")]
    pub price_per_unit: i64,
    pub is_active: bool,
}

impl TariffTier {
    pub fn is_last_range(&self) -> bool {
        self.usage_max.is_none()
    }

    /// Inclusive membership test, unbounded tiers extend to infinity
    pub fn contains(&self, usage: i32) -> bool {
        usage >= self.usage_min && self.usage_max.map_or(true, |max| usage <= max)
    }

    fn label(&self) -> String {
        match self.usage_max {
            Some(max) => format!("{}-{}", self.usage_min, max),
            None => format!("{}+", self.usage_min),
        }
    }
}

/// Requested edit of a tier. Only one of `new_max` / `new_min` is allowed,
/// depending on whether the tier is the last (unbounded) one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEdit {
    pub new_max: Option<i32>,
    pub new_min: Option<i32>,
    pub new_price: Option<i64>,
}

/// Row-level write produced by a tariff edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    Insert(TariffTier),
    Update(TariffTier),
    Delete(Uuid),
}

/// In-memory view of one village's tariff, ordered by `usage_min`
#[derive(Debug, Clone)]
pub struct TariffTable {
    village_id: Uuid,
    tiers: Vec<TariffTier>,
}

impl TariffTable {
    pub fn new(village_id: Uuid, mut tiers: Vec<TariffTier>) -> Self {
        tiers.sort_by_key(|t| t.usage_min);
        Self { village_id, tiers }
    }

    pub fn tiers(&self) -> &[TariffTier] {
        &self.tiers
    }

    pub fn into_tiers(self) -> Vec<TariffTier> {
        self.tiers
    }

    fn position(&self, tier_id: Uuid) -> BillingResult<usize> {
        self.tiers
            .iter()
            .position(|t| t.id == tier_id)
            .ok_or_else(|| BillingError::NotFound(format!("tariff range {}", tier_id)))
    }

    /// Insert a tier starting at `new_min`.
    ///
    /// The new tier ends right before the next tier, or is unbounded when it
    /// is placed after every existing tier. When it lands in front of an
    /// existing tier and after another one, the preceding tier is closed at
    /// `new_min - 1`.
    pub fn create_range(
        &mut self,
        new_min: i32,
        price: i64,
    ) -> BillingResult<(TariffTier, Vec<TierWrite>)> {
        if new_min < 0 {
            return Err(BillingError::Validation(
                "usage_min must be zero or greater".to_string(),
            ));
        }
        validate_price(price)?;

        if let Some(existing) = self.tiers.iter().find(|t| t.contains(new_min)) {
            return Err(BillingError::Validation(format!(
                "usage_min {} falls inside existing range {}",
                new_min,
                existing.label()
            )));
        }

        let pos = self
            .tiers
            .iter()
            .position(|t| t.usage_min > new_min)
            .unwrap_or(self.tiers.len());

        let usage_max = self.tiers.get(pos).map(|next| next.usage_min - 1);

        let tier = TariffTier {
            id: Uuid::new_v4(),
            village_id: self.village_id,
            usage_min: new_min,
            usage_max,
            price_per_unit: price,
            is_active: true,
        };

        let mut writes = Vec::with_capacity(2);

        if pos > 0 && pos < self.tiers.len() {
            let prev = &mut self.tiers[pos - 1];
            prev.usage_max = Some(new_min - 1);
            writes.push(TierWrite::Update(prev.clone()));
        }

        self.tiers.insert(pos, tier.clone());
        writes.push(TierWrite::Insert(tier.clone()));

        Ok((tier, writes))
    }

    /// Edit a tier's boundary and/or price, repairing the adjacent tier.
    pub fn update_range(
        &mut self,
        tier_id: Uuid,
        edit: &RangeEdit,
    ) -> BillingResult<(TariffTier, Vec<TierWrite>)> {
        if edit.new_max.is_none() && edit.new_min.is_none() && edit.new_price.is_none() {
            return Err(BillingError::Validation("nothing to update".to_string()));
        }

        let idx = self.position(tier_id)?;
        let is_last = self.tiers[idx].is_last_range();
        let mut writes = Vec::with_capacity(2);

        if is_last && edit.new_max.is_some() {
            return Err(BillingError::Validation(
                "usage_max cannot be set on the last range; edit usage_min instead".to_string(),
            ));
        }
        if !is_last && edit.new_min.is_some() {
            return Err(BillingError::Validation(
                "usage_min can only be edited on the last range; edit usage_max instead"
                    .to_string(),
            ));
        }
        if let Some(price) = edit.new_price {
            validate_price(price)?;
        }

        if let Some(new_max) = edit.new_max {
            let current_min = self.tiers[idx].usage_min;
            if new_max < current_min {
                return Err(BillingError::Validation(format!(
                    "usage_max {} is below usage_min {}",
                    new_max, current_min
                )));
            }

            if let Some(next) = self.tiers.get(idx + 1) {
                // The successor must keep at least one unit
                if let Some(next_max) = next.usage_max {
                    if new_max >= next_max {
                        return Err(BillingError::Validation(format!(
                            "usage_max {} would leave the next range {} empty",
                            new_max,
                            next.label()
                        )));
                    }
                }
                let next_min = new_max.checked_add(1).ok_or_else(|| {
                    BillingError::Validation(format!(
                        "usage_max {} leaves no room for the next range",
                        new_max
                    ))
                })?;
                let next = &mut self.tiers[idx + 1];
                next.usage_min = next_min;
                writes.push(TierWrite::Update(next.clone()));
            }

            self.tiers[idx].usage_max = Some(new_max);
        }

        if let Some(new_min) = edit.new_min {
            if new_min < 0 {
                return Err(BillingError::Validation(
                    "usage_min must be zero or greater".to_string(),
                ));
            }

            if idx > 0 {
                let prev = &self.tiers[idx - 1];
                // The predecessor must keep at least one unit
                if new_min <= prev.usage_min {
                    return Err(BillingError::Validation(format!(
                        "usage_min {} would leave the previous range {} empty",
                        new_min,
                        prev.label()
                    )));
                }
                let prev = &mut self.tiers[idx - 1];
                prev.usage_max = Some(new_min - 1);
                writes.push(TierWrite::Update(prev.clone()));
            }

            self.tiers[idx].usage_min = new_min;
        }

        if let Some(price) = edit.new_price {
            self.tiers[idx].price_per_unit = price;
        }

        let updated = self.tiers[idx].clone();
        writes.push(TierWrite::Update(updated.clone()));

        Ok((updated, writes))
    }

    /// Remove a tier and stitch its neighbours back together.
    pub fn delete_range(&mut self, tier_id: Uuid) -> BillingResult<(TariffTier, Vec<TierWrite>)> {
        let idx = self.position(tier_id)?;
        let removed = self.tiers.remove(idx);
        let mut writes = vec![TierWrite::Delete(removed.id)];

        // After removal, idx points at the former successor
        let successor_min = self.tiers.get(idx).map(|t| t.usage_min);

        if idx > 0 {
            let prev = &mut self.tiers[idx - 1];
            prev.usage_max = successor_min.map(|min| min - 1);
            writes.push(TierWrite::Update(prev.clone()));
        }

        Ok((removed, writes))
    }

    /// Check that the tiers partition `[0, ∞)`; returns every problem found.
    pub fn partition_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let Some(first) = self.tiers.first() else {
            return problems;
        };
        if first.usage_min != 0 {
            problems.push(format!("first range starts at {} instead of 0", first.usage_min));
        }

        for pair in self.tiers.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match a.usage_max {
                None => problems.push(format!(
                    "unbounded range {} is followed by {}",
                    a.label(),
                    b.label()
                )),
                Some(max) if max + 1 < b.usage_min => {
                    problems.push(format!("gap between {} and {}", a.label(), b.label()))
                }
                Some(max) if max >= b.usage_min => {
                    problems.push(format!("{} overlaps {}", a.label(), b.label()))
                }
                _ => {}
            }
        }

        if let Some(last) = self.tiers.last() {
            if !last.is_last_range() {
                problems.push(format!("last range {} is bounded", last.label()));
            }
        }

        problems
    }
}

fn validate_price(price: i64) -> BillingResult<()> {
    if price < 0 {
        return Err(BillingError::Validation(
            "price_per_m3 must be zero or greater".to_string(),
        ));
    }
    Ok(())
}

/// Service owning tariff range persistence
#[derive(Clone)]
pub struct TariffRangeService {
    pool: PgPool,
    events: BillingEventLogger,
}

impl TariffRangeService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: BillingEventLogger::new(pool.clone()),
            pool,
        }
    }

    /// Ordered tiers of a village
    pub async fn list_ranges(&self, village_id: Uuid) -> BillingResult<Vec<TariffTier>> {
        let tiers = sqlx::query_as::<_, TariffTier>(
            r#"
            SELECT id, village_id, usage_min, usage_max, price_per_m3, is_active
            FROM water_tariffs
            WHERE village_id = $1
            ORDER BY usage_min ASC
            "#,
        )
        .bind(village_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tiers)
    }

    pub async fn create_range(
        &self,
        village_id: Uuid,
        new_min: i32,
        price: i64,
        actor_id: Option<Uuid>,
    ) -> BillingResult<TariffTier> {
        let mut tx = self.pool.begin().await?;
        let mut table = lock_table(&mut tx, village_id).await?;

        let (tier, writes) = table.create_range(new_min, price)?;
        apply_writes(&mut tx, &writes).await?;
        tx.commit().await?;

        tracing::info!(
            village_id = %village_id,
            tier_id = %tier.id,
            usage_min = tier.usage_min,
            usage_max = ?tier.usage_max,
            price_per_m3 = tier.price_per_unit,
            "Tariff range created"
        );

        self.events
            .record(
                BillingEventBuilder::new(village_id, BillingEventType::TariffRangeCreated)
                    .data(serde_json::json!({
                        "tier_id": tier.id,
                        "usage_min": tier.usage_min,
                        "usage_max": tier.usage_max,
                        "price_per_m3": tier.price_per_unit,
                        "rows_written": writes.len(),
                    }))
                    .actor_opt(actor_id, ActorType::Admin),
            )
            .await;

        Ok(tier)
    }

    pub async fn update_range(
        &self,
        village_id: Uuid,
        tier_id: Uuid,
        edit: RangeEdit,
        actor_id: Option<Uuid>,
    ) -> BillingResult<TariffTier> {
        let mut tx = self.pool.begin().await?;
        let mut table = lock_table(&mut tx, village_id).await?;

        let (tier, writes) = table.update_range(tier_id, &edit)?;
        apply_writes(&mut tx, &writes).await?;
        tx.commit().await?;

        tracing::info!(
            village_id = %village_id,
            tier_id = %tier.id,
            usage_min = tier.usage_min,
            usage_max = ?tier.usage_max,
            neighbours_touched = writes.len() - 1,
            "Tariff range updated"
        );

        self.events
            .record(
                BillingEventBuilder::new(village_id, BillingEventType::TariffRangeUpdated)
                    .data(serde_json::json!({
                        "tier_id": tier.id,
                        "edit": edit,
                        "usage_min": tier.usage_min,
                        "usage_max": tier.usage_max,
                        "price_per_m3": tier.price_per_unit,
                    }))
                    .actor_opt(actor_id, ActorType::Admin),
            )
            .await;

        Ok(tier)
    }

    pub async fn delete_range(
        &self,
        village_id: Uuid,
        tier_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> BillingResult<TariffTier> {
        let mut tx = self.pool.begin().await?;
        let mut table = lock_table(&mut tx, village_id).await?;

        let (removed, writes) = table.delete_range(tier_id)?;
        apply_writes(&mut tx, &writes).await?;
        tx.commit().await?;

        tracing::info!(
            village_id = %village_id,
            tier_id = %removed.id,
            usage_min = removed.usage_min,
            usage_max = ?removed.usage_max,
            "Tariff range deleted"
        );

        self.events
            .record(
                BillingEventBuilder::new(village_id, BillingEventType::TariffRangeDeleted)
                    .data(serde_json::json!({
                        "tier_id": removed.id,
                        "usage_min": removed.usage_min,
                        "usage_max": removed.usage_max,
                    }))
                    .actor_opt(actor_id, ActorType::Admin),
            )
            .await;

        Ok(removed)
    }
}

/// Lock the village row and every tier of the village for the rest of the transaction.
///
/// The village lock also serializes inserts into a village that has no tiers
/// yet, where `FOR UPDATE` on the tier rows alone would lock nothing.
async fn lock_table(
    tx: &mut Transaction<'_, Postgres>,
    village_id: Uuid,
) -> BillingResult<TariffTable> {
    let village: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM villages WHERE id = $1 FOR UPDATE")
        .bind(village_id)
        .fetch_optional(&mut **tx)
        .await?;
    if village.is_none() {
        return Err(BillingError::NotFound(format!("village {}", village_id)));
    }

    let tiers = sqlx::query_as::<_, TariffTier>(
        r#"
        SELECT id, village_id, usage_min, usage_max, price_per_m3, is_active
        FROM water_tariffs
        WHERE village_id = $1
        ORDER BY usage_min ASC
        FOR UPDATE
        "#,
    )
    .bind(village_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(TariffTable::new(village_id, tiers))
}

async fn apply_writes(tx: &mut Transaction<'_, Postgres>, writes: &[TierWrite]) -> BillingResult<()> {
    for write in writes {
        match write {
            TierWrite::Insert(tier) => {
                sqlx::query(
                    r#"
                    INSERT INTO water_tariffs (id, village_id, usage_min, usage_max, price_per_m3, is_active)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(tier.id)
                .bind(tier.village_id)
                .bind(tier.usage_min)
                .bind(tier.usage_max)
                .bind(tier.price_per_unit)
                .bind(tier.is_active)
                .execute(&mut **tx)
                .await?;
            }
            TierWrite::Update(tier) => {
                sqlx::query(
                    r#"
                    UPDATE water_tariffs
                    SET usage_min = $2, usage_max = $3, price_per_m3 = $4, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(tier.id)
                .bind(tier.usage_min)
                .bind(tier.usage_max)
                .bind(tier.price_per_unit)
                .execute(&mut **tx)
                .await?;
            }
            TierWrite::Delete(id) => {
                sqlx::query("DELETE FROM water_tariffs WHERE id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tier(village_id: Uuid, min: i32, max: Option<i32>, price: i64) -> TariffTier {
        TariffTier {
            id: Uuid::new_v4(),
            village_id,
            usage_min: min,
            usage_max: max,
            price_per_unit: price,
            is_active: true,
        }
    }

    fn bounds(table: &TariffTable) -> Vec<(i32, Option<i32>)> {
        table
            .tiers()
            .iter()
            .map(|t| (t.usage_min, t.usage_max))
            .collect()
    }

    /// [0-10 @100, 11-20 @150, 21-30 @200, 31+ @250]
    fn four_tiers() -> TariffTable {
        let v = Uuid::new_v4();
        TariffTable::new(
            v,
            vec![
                tier(v, 21, Some(30), 200),
                tier(v, 0, Some(10), 100),
                tier(v, 31, None, 250),
                tier(v, 11, Some(20), 150),
            ],
        )
    }

    #[test]
    fn test_table_is_sorted_on_construction() {
        let table = four_tiers();
        assert_eq!(
            bounds(&table),
            vec![(0, Some(10)), (11, Some(20)), (21, Some(30)), (31, None)]
        );
        assert!(table.partition_problems().is_empty());
    }

    #[test]
    fn test_create_first_range_in_empty_table_is_unbounded() {
        let mut table = TariffTable::new(Uuid::new_v4(), vec![]);
        let (created, writes) = table.create_range(0, 1000).unwrap();
        assert_eq!(created.usage_max, None);
        assert_eq!(writes, vec![TierWrite::Insert(created)]);
    }

    #[test]
    fn test_create_builds_table_from_the_top_down() {
        let mut table = TariffTable::new(Uuid::new_v4(), vec![]);
        table.create_range(21, 200).unwrap();
        table.create_range(11, 150).unwrap();
        table.create_range(0, 100).unwrap();

        assert_eq!(bounds(&table), vec![(0, Some(10)), (11, Some(20)), (21, None)]);
        assert!(table.partition_problems().is_empty());
    }

    #[test]
    fn test_create_rejects_minimum_inside_existing_range() {
        let mut table = four_tiers();
        let err = table.create_range(15, 100).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        // Boundaries are inclusive on both ends
        assert!(table.create_range(10, 100).is_err());
        assert!(table.create_range(11, 100).is_err());
        // Unbounded tier extends to infinity
        assert!(table.create_range(10_000, 100).is_err());
    }

    #[test]
    fn test_create_rejects_negative_minimum_and_price() {
        let mut table = TariffTable::new(Uuid::new_v4(), vec![]);
        assert!(matches!(
            table.create_range(-1, 100),
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            table.create_range(0, -5),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_create_in_gap_closes_predecessor() {
        let v = Uuid::new_v4();
        let mut table = TariffTable::new(
            v,
            vec![tier(v, 0, Some(5), 100), tier(v, 21, None, 200)],
        );

        let (created, writes) = table.create_range(11, 150).unwrap();
        assert_eq!((created.usage_min, created.usage_max), (11, Some(20)));
        assert_eq!(bounds(&table), vec![(0, Some(10)), (11, Some(20)), (21, None)]);
        // predecessor update + insert, nothing else touched
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn test_create_below_first_range_touches_nothing_else() {
        let v = Uuid::new_v4();
        let mut table = TariffTable::new(
            v,
            vec![tier(v, 11, Some(20), 150), tier(v, 21, None, 200)],
        );
        let (created, writes) = table.create_range(0, 100).unwrap();
        assert_eq!(created.usage_max, Some(10));
        assert_eq!(writes.len(), 1);
    }

    #[test]
    fn test_create_then_delete_restores_table() {
        let v = Uuid::new_v4();
        let original = vec![tier(v, 11, Some(20), 150), tier(v, 21, None, 200)];
        let mut table = TariffTable::new(v, original.clone());

        let (created, _) = table.create_range(3, 90).unwrap();
        table.delete_range(created.id).unwrap();

        assert_eq!(table.into_tiers(), original);
    }

    #[test]
    fn test_extend_middle_range_moves_successor_minimum() {
        let mut table = four_tiers();
        let id = table.tiers()[1].id;

        let (updated, writes) = table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(25),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!((updated.usage_min, updated.usage_max), (11, Some(25)));
        assert_eq!(
            bounds(&table),
            vec![(0, Some(10)), (11, Some(25)), (26, Some(30)), (31, None)]
        );
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn test_extend_that_empties_successor_is_rejected() {
        let mut table = four_tiers();
        let id = table.tiers()[1].id;
        let before = bounds(&table);

        let err = table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(30),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(bounds(&table), before);
    }

    #[test]
    fn test_shrink_middle_range_grows_successor_downward() {
        let mut table = four_tiers();
        let id = table.tiers()[1].id;
        table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(11),
                    ..Default::default()
                },
            )
            .unwrap();
        // single-unit tier is valid
        assert_eq!(
            bounds(&table),
            vec![(0, Some(10)), (11, Some(11)), (12, Some(30)), (31, None)]
        );
    }

    #[test]
    fn test_max_below_min_is_rejected() {
        let mut table = four_tiers();
        let id = table.tiers()[1].id;
        assert!(table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(10),
                    ..Default::default()
                },
            )
            .is_err());
    }

    #[test]
    fn test_extend_before_unbounded_successor() {
        let mut table = four_tiers();
        let id = table.tiers()[2].id;
        table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(500),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(table.tiers()[3].usage_min, 501);
        assert!(table.partition_problems().is_empty());
    }

    #[test]
    fn test_extend_to_integer_limit_is_rejected() {
        let mut table = four_tiers();
        let before = table.tiers().to_vec();
        let id = table.tiers()[2].id;

        let err = table
            .update_range(
                id,
                &RangeEdit {
                    new_max: Some(i32::MAX),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(table.tiers(), before.as_slice());
    }

    #[test]
    fn test_last_range_only_accepts_min_edits() {
        let mut table = four_tiers();
        let last = table.tiers()[3].id;
        let middle = table.tiers()[1].id;

        let err = table
            .update_range(
                last,
                &RangeEdit {
                    new_max: Some(100),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        let err = table
            .update_range(
                middle,
                &RangeEdit {
                    new_min: Some(12),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_move_last_range_minimum_rewrites_predecessor() {
        let mut table = four_tiers();
        let last = table.tiers()[3].id;

        table
            .update_range(
                last,
                &RangeEdit {
                    new_min: Some(41),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(table.tiers()[2].usage_max, Some(40));
        assert_eq!(table.tiers()[3].usage_min, 41);

        table
            .update_range(
                last,
                &RangeEdit {
                    new_min: Some(22),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            bounds(&table),
            vec![(0, Some(10)), (11, Some(20)), (21, Some(21)), (22, None)]
        );

        // 21 would leave the predecessor 21-21 empty
        assert!(table
            .update_range(
                last,
                &RangeEdit {
                    new_min: Some(21),
                    ..Default::default()
                },
            )
            .is_err());
    }

    #[test]
    fn test_price_only_update_touches_one_row() {
        let mut table = four_tiers();
        let id = table.tiers()[0].id;
        let (updated, writes) = table
            .update_range(
                id,
                &RangeEdit {
                    new_price: Some(120),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.price_per_unit, 120);
        assert_eq!(writes, vec![TierWrite::Update(updated)]);
    }

    #[test]
    fn test_empty_edit_is_rejected() {
        let mut table = four_tiers();
        let id = table.tiers()[0].id;
        assert!(table.update_range(id, &RangeEdit::default()).is_err());
    }

    #[test]
    fn test_update_unknown_tier_is_not_found() {
        let mut table = four_tiers();
        let err = table
            .update_range(
                Uuid::new_v4(),
                &RangeEdit {
                    new_price: Some(1),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[test]
    fn test_delete_middle_range_stitches_neighbours() {
        let mut table = four_tiers();
        let id = table.tiers()[1].id;
        table.delete_range(id).unwrap();
        assert_eq!(bounds(&table), vec![(0, Some(20)), (21, Some(30)), (31, None)]);
    }

    #[test]
    fn test_delete_last_range_unbounds_predecessor() {
        let mut table = four_tiers();
        let id = table.tiers()[3].id;
        table.delete_range(id).unwrap();
        assert_eq!(bounds(&table), vec![(0, Some(10)), (11, Some(20)), (21, None)]);
        assert!(table.partition_problems().is_empty());
    }

    #[test]
    fn test_delete_first_range_leaves_successor_alone() {
        let mut table = four_tiers();
        let id = table.tiers()[0].id;
        let (_, writes) = table.delete_range(id).unwrap();
        assert_eq!(writes, vec![TierWrite::Delete(id)]);
        assert_eq!(table.tiers()[0].usage_min, 11);
    }

    #[test]
    fn test_partition_problems_reports_gaps_and_overlaps() {
        let v = Uuid::new_v4();
        let table = TariffTable::new(
            v,
            vec![
                tier(v, 1, Some(10), 100),
                tier(v, 12, Some(20), 100),
                tier(v, 20, Some(30), 100),
            ],
        );
        let problems = table.partition_problems();
        assert_eq!(problems.len(), 4, "{:?}", problems);
    }
}
