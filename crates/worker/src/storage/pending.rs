//! Pending-change queue: enqueue, claim, reclaim and resolve.
//!
//! Lifecycle of an entry: `pending -> processing -> (deleted)`.

use super::{now_millis, ClaimedChange, ClaimedSubject, QueueStats, Storage};
use anyhow::{Context, Result};
use footprint_core::types::{ChangeRef, PendingChange, PendingId, PendingStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::time::Duration;

/// Insert a `pending` entry on an open connection or transaction.
///
/// Used by the catalog writes so the capture commits together with the row
/// that triggered it.
pub(crate) async fn insert_pending(
    conn: &mut SqliteConnection,
    target: ChangeRef,
    now: i64,
) -> Result<PendingId> {
    let result = sqlx::query(
        r#"
        INSERT INTO pending_changes (product_id, factor_id, status, created_at, last_update)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(target.product_column())
    .bind(target.factor_column())
    .bind(PendingStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to enqueue pending change for {target}"))?;

    Ok(PendingId(result.last_insert_rowid()))
}

fn row_to_pending_change(row: &SqliteRow) -> Result<PendingChange> {
    let target = ChangeRef::from_columns(
        row.get::<Option<i64>, _>("product_id"),
        row.get::<Option<i64>, _>("factor_id"),
    )?;
    let status: PendingStatus = row.get::<String, _>("status").parse()?;

    Ok(PendingChange {
        id: PendingId(row.get::<i64, _>("id")),
        target,
        status,
        created_at: row.get::<i64, _>("created_at"),
        last_update: row.get::<i64, _>("last_update"),
        lease: row.get::<i64, _>("lease"),
    })
}

impl Storage {
    /// Enqueue a pending change for `target`.
    ///
    /// Duplicates for the same entity are allowed; recomputation is idempotent.
    pub async fn enqueue_change(&self, target: ChangeRef) -> Result<PendingId> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        insert_pending(&mut conn, target, now_millis()).await
    }

    /// Atomically claim up to `batch_size` pending entries.
    ///
    /// The oldest entries (by `last_update`) are flipped to `processing` with
    /// `last_update = now` and a fresh `lease` in a single statement. SQLite
    /// serializes writers, so two concurrent callers can never return the same
    /// entry. Returned entries are ordered by creation.
    pub async fn claim_pending(&self, batch_size: u32, now: i64) -> Result<Vec<PendingChange>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin claim transaction")?;

        let rows = sqlx::query(
            r#"
            UPDATE pending_changes
            SET status = ?, last_update = ?, lease = lease + 1
            WHERE id IN (
                SELECT id
                FROM pending_changes
                WHERE status = ?
                ORDER BY last_update ASC, id ASC
                LIMIT ?
            )
            RETURNING id, product_id, factor_id, status, created_at, last_update, lease
            "#,
        )
        .bind(PendingStatus::Processing.as_str())
        .bind(now)
        .bind(PendingStatus::Pending.as_str())
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to claim pending changes")?;

        tx.commit()
            .await
            .context("Failed to commit claim transaction")?;

        let mut claimed = rows
            .iter()
            .map(row_to_pending_change)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|change| (change.created_at, change.id));

        Ok(claimed)
    }

    /// Load the referenced product or factor of each claimed entry.
    ///
    /// Runs outside the claim transaction; a vanished entity loads as `None`.
    pub async fn load_claimed(&self, claimed: Vec<PendingChange>) -> Result<Vec<ClaimedChange>> {
        let mut loaded = Vec::with_capacity(claimed.len());

        for pending in claimed {
            let subject = match pending.target {
                ChangeRef::Product(id) => ClaimedSubject::Product(self.find_product_by_id(id).await?),
                ChangeRef::Factor(id) => ClaimedSubject::Factor(self.find_factor_by_id(id).await?),
            };
            loaded.push(ClaimedChange { pending, subject });
        }

        Ok(loaded)
    }

    /// Extend the lease on a claimed entry to `now`.
    ///
    /// Returns `false` if the entry is gone, back in `pending`, or claimed again
    /// under a newer lease; the caller no longer holds it and must not touch it.
    pub async fn renew_lease(&self, pending: &PendingChange, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pending_changes
            SET last_update = ?
            WHERE id = ? AND lease = ? AND status = ?
            "#,
        )
        .bind(now)
        .bind(pending.id.get())
        .bind(pending.lease)
        .bind(PendingStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to renew lease on pending change {}", pending.id))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a resolved entry.
    ///
    /// Only an entry still `processing` under the caller's lease is deleted.
    /// Returns `false` if the entry was already gone, reclaimed back to
    /// `pending`, or claimed again by someone else.
    pub async fn resolve_pending(&self, pending: &PendingChange) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM pending_changes
            WHERE id = ? AND lease = ? AND status = ?
            "#,
        )
        .bind(pending.id.get())
        .bind(pending.lease)
        .bind(PendingStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to resolve pending change {}", pending.id))?;

        Ok(result.rows_affected() > 0)
    }

    /// Revert `processing` entries whose lease has expired back to `pending`.
    ///
    /// An entry's lease started at its `last_update`. Returns the number of
    /// entries reclaimed.
    pub async fn reclaim_expired(&self, lease_ttl: Duration, now: i64) -> Result<u64> {
        let ttl = i64::try_from(lease_ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(ttl);

        let result = sqlx::query(
            r#"
            UPDATE pending_changes
            SET status = ?, last_update = ?
            WHERE status = ? AND last_update < ?
            "#,
        )
        .bind(PendingStatus::Pending.as_str())
        .bind(now)
        .bind(PendingStatus::Processing.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to reclaim expired pending changes")?;

        Ok(result.rows_affected())
    }

    /// Get a pending entry by id.
    pub async fn get_pending(&self, id: PendingId) -> Result<Option<PendingChange>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, factor_id, status, created_at, last_update, lease
            FROM pending_changes
            WHERE id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch pending change")?;

        row.as_ref().map(row_to_pending_change).transpose()
    }

    /// List entries in the given status, oldest first.
    pub async fn list_pending(&self, status: PendingStatus) -> Result<Vec<PendingChange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, factor_id, status, created_at, last_update, lease
            FROM pending_changes
            WHERE status = ?
            ORDER BY last_update ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending changes")?;

        rows.iter().map(row_to_pending_change).collect()
    }

    /// Count entries per status.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
                MIN(created_at) AS oldest_created_at
            FROM pending_changes
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute queue stats")?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending") as u64,
            processing: row.get::<i64, _>("processing") as u64,
            oldest_created_at: row.get::<Option<i64>, _>("oldest_created_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use crate::storage::{NewFactor, NewIngredientQuantity, NewProduct};
    use footprint_core::types::{FactorId, ProductId};
    use footprint_core::Unit;
    use std::collections::HashSet;

    async fn seed_product(storage: &Storage, name: &str) -> ProductId {
        storage
            .save_product(&NewProduct {
                name: name.to_string(),
                ingredients: vec![NewIngredientQuantity {
                    name: "flour".to_string(),
                    unit: Unit::G,
                    quantity: 100.0,
                }],
            })
            .await
            .unwrap()
    }

    async fn drain(storage: &Storage) {
        sqlx::query("DELETE FROM pending_changes")
            .execute(storage.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;

        let id = storage
            .enqueue_change(ChangeRef::Product(product))
            .await
            .unwrap();

        let entry = storage.get_pending(id).await.unwrap().unwrap();
        assert_eq!(entry.target, ChangeRef::Product(product));
        assert_eq!(entry.status, PendingStatus::Pending);
        assert_eq!(entry.created_at, entry.last_update);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_exactly_one_reference_enforced_by_store() {
        let (storage, _temp_db) = setup_storage().await;

        let result = sqlx::query(
            "INSERT INTO pending_changes (product_id, factor_id, status, created_at, last_update) \
             VALUES (NULL, NULL, 'pending', 0, 0)",
        )
        .execute(storage.pool())
        .await;
        assert!(result.is_err());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_claim_marks_processing_and_respects_batch_size() {
        let (storage, _temp_db) = setup_storage().await;
        for i in 0..5 {
            seed_product(&storage, &format!("product-{i}")).await;
        }

        let claimed = storage.claim_pending(3, now_millis()).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert!(claimed
            .iter()
            .all(|c| c.status == PendingStatus::Processing));

        let stats = storage.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 3);

        let rest = storage.claim_pending(10, now_millis()).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(storage
            .claim_pending(10, now_millis())
            .await
            .unwrap()
            .is_empty());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_claim_takes_oldest_last_update_first() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;

        let mut conn = storage.pool().acquire().await.unwrap();
        let newer = insert_pending(&mut conn, ChangeRef::Product(product), 2_000)
            .await
            .unwrap();
        let older = insert_pending(&mut conn, ChangeRef::Product(product), 1_000)
            .await
            .unwrap();
        drop(conn);

        let claimed = storage.claim_pending(1, 5_000).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, older);
        assert_eq!(claimed[0].last_update, 5_000);

        let claimed = storage.claim_pending(1, 5_000).await.unwrap();
        assert_eq!(claimed[0].id, newer);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        for _ in 0..49 {
            storage
                .enqueue_change(ChangeRef::Product(product))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                loop {
                    let batch = storage.claim_pending(7, now_millis()).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    ids.extend(batch.into_iter().map(|c| c.id));
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(id), "entry {id} claimed twice");
            }
        }
        assert_eq!(total, 50);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_resolve_only_deletes_processing_entries() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;

        let id = storage
            .enqueue_change(ChangeRef::Product(product))
            .await
            .unwrap();
        let queued = storage.get_pending(id).await.unwrap().unwrap();
        assert!(!storage.resolve_pending(&queued).await.unwrap());
        assert!(storage.get_pending(id).await.unwrap().is_some());

        let claimed = storage.claim_pending(10, now_millis()).await.unwrap();
        assert_eq!(claimed[0].lease, queued.lease + 1);
        assert!(storage.resolve_pending(&claimed[0]).await.unwrap());
        assert!(storage.get_pending(id).await.unwrap().is_none());
        assert!(!storage.resolve_pending(&claimed[0]).await.unwrap());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_renew_or_resolve() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;
        storage
            .enqueue_change(ChangeRef::Product(product))
            .await
            .unwrap();
        let ttl = Duration::from_secs(60);

        let first = storage.claim_pending(10, 10_000).await.unwrap().remove(0);
        assert!(storage.renew_lease(&first, 50_000).await.unwrap());

        // Renewed at 50s, so still held at 100s.
        assert_eq!(storage.reclaim_expired(ttl, 100_000).await.unwrap(), 0);

        // Lease runs out; another worker takes the entry over.
        assert_eq!(storage.reclaim_expired(ttl, 110_001).await.unwrap(), 1);
        let second = storage.claim_pending(10, 110_002).await.unwrap().remove(0);
        assert_eq!(second.id, first.id);
        assert!(second.lease > first.lease);

        assert!(!storage.renew_lease(&first, 110_003).await.unwrap());
        assert!(!storage.resolve_pending(&first).await.unwrap());
        let entry = storage.get_pending(first.id).await.unwrap().unwrap();
        assert_eq!(entry.status, PendingStatus::Processing);
        assert_eq!(entry.lease, second.lease);

        assert!(storage.resolve_pending(&second).await.unwrap());
        assert!(storage.get_pending(first.id).await.unwrap().is_none());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_reclaim_with_huge_lease_ttl() {
        let (storage, _temp_db) = setup_storage().await;
        seed_product(&storage, "bread").await;
        storage.claim_pending(10, 10_000).await.unwrap();

        assert_eq!(
            storage
                .reclaim_expired(Duration::MAX, now_millis())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            storage
                .reclaim_expired(Duration::from_secs(u64::MAX / 1_000), i64::MIN + 1)
                .await
                .unwrap(),
            0
        );

        storage.close().await;
    }

    #[tokio::test]
    async fn test_reclaim_expired_leases() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;
        storage
            .enqueue_change(ChangeRef::Product(product))
            .await
            .unwrap();

        let claimed = storage.claim_pending(10, 10_000).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let ttl = Duration::from_secs(60);

        // Lease still valid.
        assert_eq!(storage.reclaim_expired(ttl, 69_999).await.unwrap(), 0);
        assert!(storage.claim_pending(10, 69_999).await.unwrap().is_empty());

        assert_eq!(storage.reclaim_expired(ttl, 70_001).await.unwrap(), 1);
        let entry = storage.get_pending(claimed[0].id).await.unwrap().unwrap();
        assert_eq!(entry.status, PendingStatus::Pending);
        assert_eq!(entry.last_update, 70_001);

        let again = storage.claim_pending(10, 70_002).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, claimed[0].id);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_load_claimed_resolves_subjects() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        let factor = storage
            .save_factor(&NewFactor {
                name: "flour".to_string(),
                unit: Unit::Kg,
                co2e_per_unit: 0.14,
                source: "Agrybalise".to_string(),
            })
            .await
            .unwrap();
        storage
            .enqueue_change(ChangeRef::Factor(FactorId(9_999)))
            .await
            .unwrap_err();

        let claimed = storage.claim_pending(10, now_millis()).await.unwrap();
        let loaded = storage.load_claimed(claimed).await.unwrap();
        assert_eq!(loaded.len(), 2);

        match &loaded[0].subject {
            ClaimedSubject::Product(Some(p)) => {
                assert_eq!(p.id, product);
                assert_eq!(p.ingredients.len(), 1);
                assert_eq!(p.ingredients[0].ingredient.name, "flour");
            }
            other => panic!("unexpected subject {other:?}"),
        }
        match &loaded[1].subject {
            ClaimedSubject::Factor(Some(f)) => assert_eq!(f.id, factor),
            other => panic!("unexpected subject {other:?}"),
        }

        storage.close().await;
    }

    #[tokio::test]
    async fn test_queue_stats_oldest() {
        let (storage, _temp_db) = setup_storage().await;
        let product = seed_product(&storage, "bread").await;
        drain(&storage).await;

        let mut conn = storage.pool().acquire().await.unwrap();
        insert_pending(&mut conn, ChangeRef::Product(product), 300)
            .await
            .unwrap();
        insert_pending(&mut conn, ChangeRef::Product(product), 100)
            .await
            .unwrap();
        drop(conn);

        let stats = storage.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.oldest_created_at, Some(100));

        storage.close().await;
    }
}
