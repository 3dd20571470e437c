//! Tenant operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use super::{Store, Tenant};

impl Store {
    /// Register or update a tenant
    pub async fn upsert_tenant(
        &self,
        tenant_id: &str,
        available_balance: i64,
        max_concurrent_calls: i64,
        caller_numbers: &[String],
    ) -> Result<()> {
        let numbers = serde_json::to_string(caller_numbers)?;
        sqlx::query(
            "INSERT INTO tenants (tenant_id, available_balance, max_concurrent_calls, caller_numbers)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                available_balance = excluded.available_balance,
                max_concurrent_calls = excluded.max_concurrent_calls,
                caller_numbers = excluded.caller_numbers",
        )
        .bind(tenant_id)
        .bind(available_balance)
        .bind(max_concurrent_calls)
        .bind(numbers)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT tenant_id, available_balance, max_concurrent_calls, caller_numbers,
                    last_incoming_aggregation_time
             FROM tenants WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Tenant::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Read only the balance, the hot pre-dial check
    pub async fn get_tenant_balance(&self, tenant_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT available_balance FROM tenants WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("available_balance")?)),
            None => Ok(None),
        }
    }

    /// Apply a signed delta to the balance and return the post-state.
    /// Negative balances are allowed transiently; the runner's pre-dial check
    /// is what stops further spend.
    pub async fn adjust_tenant_balance(&self, tenant_id: &str, delta: i64) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE tenants SET available_balance = available_balance + ?
             WHERE tenant_id = ?
             RETURNING available_balance",
        )
        .bind(delta)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        let balance: i64 = row.try_get("available_balance")?;
        debug!("tenant {} balance {:+} -> {}", tenant_id, delta, balance);
        Ok(balance)
    }

    /// Find the tenant owning an incoming number. The caller passes all
    /// dialable variants of the number (bare, 0-prefixed, country-prefixed);
    /// matching is against the tenant's caller-number set.
    pub async fn find_tenant_by_caller_number(&self, variants: &[String]) -> Result<Option<Tenant>> {
        if variants.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; variants.len()].join(", ");
        let sql = format!(
            "SELECT t.tenant_id, t.available_balance, t.max_concurrent_calls,
                    t.caller_numbers, t.last_incoming_aggregation_time
             FROM tenants t, json_each(t.caller_numbers) n
             WHERE n.value IN ({placeholders})
             LIMIT 1"
        );

        let mut query = sqlx::query(&sql);
        for variant in variants {
            query = query.bind(variant);
        }

        let row = query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Tenant::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Advance the incoming-aggregation watermark only if it still matches
    /// the value the caller read, so two concurrent readers aggregate once.
    pub async fn advance_incoming_aggregation_time(
        &self,
        tenant_id: &str,
        expected: Option<DateTime<Utc>>,
        new_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = match expected {
            Some(expected) => {
                sqlx::query(
                    "UPDATE tenants SET last_incoming_aggregation_time = ?
                     WHERE tenant_id = ? AND last_incoming_aggregation_time = ?",
                )
                .bind(new_time)
                .bind(tenant_id)
                .bind(expected)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE tenants SET last_incoming_aggregation_time = ?
                     WHERE tenant_id = ? AND last_incoming_aggregation_time IS NULL",
                )
                .bind(new_time)
                .bind(tenant_id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }
}

/// Dialable variants of an Indian-format caller number: bare 10-digit,
/// `0`-prefixed, `91`-prefixed, and `+91`-prefixed.
pub fn caller_number_variants(number: &str) -> Vec<String> {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return if number.is_empty() { vec![] } else { vec![number.to_string()] };
    }
    let bare = digits[digits.len() - 10..].to_string();
    vec![
        bare.clone(),
        format!("0{bare}"),
        format!("91{bare}"),
        format!("+91{bare}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenant_roundtrip_and_balance() {
        let store = Store::new_in_memory().await.unwrap();

        store
            .upsert_tenant("tenant-1", 1000, 5, &["9876543210".to_string()])
            .await
            .unwrap();

        let tenant = store.get_tenant("tenant-1").await.unwrap().unwrap();
        assert_eq!(tenant.available_balance, 1000);
        assert_eq!(tenant.max_concurrent_calls, 5);
        assert_eq!(tenant.caller_numbers(), vec!["9876543210".to_string()]);

        let balance = store.adjust_tenant_balance("tenant-1", -60).await.unwrap();
        assert_eq!(balance, 940);

        // transiently negative is allowed
        let balance = store.adjust_tenant_balance("tenant-1", -1000).await.unwrap();
        assert_eq!(balance, -60);
    }

    #[tokio::test]
    async fn caller_number_lookup_matches_variants() {
        let store = Store::new_in_memory().await.unwrap();
        store
            .upsert_tenant("tenant-1", 0, 10, &["919876543210".to_string()])
            .await
            .unwrap();

        let found = store
            .find_tenant_by_caller_number(&caller_number_variants("+919876543210"))
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.tenant_id).as_deref(), Some("tenant-1"));

        let missing = store
            .find_tenant_by_caller_number(&caller_number_variants("+911111111111"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn variant_generation() {
        let variants = caller_number_variants("+91-98765-43210");
        assert_eq!(
            variants,
            vec!["9876543210", "09876543210", "919876543210", "+919876543210"]
        );
    }

    #[tokio::test]
    async fn aggregation_watermark_cas() {
        let store = Store::new_in_memory().await.unwrap();
        store.upsert_tenant("tenant-1", 0, 10, &[]).await.unwrap();

        let t1 = Utc::now();
        assert!(store
            .advance_incoming_aggregation_time("tenant-1", None, t1)
            .await
            .unwrap());
        // the same expected-None CAS loses the second time
        assert!(!store
            .advance_incoming_aggregation_time("tenant-1", None, Utc::now())
            .await
            .unwrap());
        // advancing from the stored value wins
        assert!(store
            .advance_incoming_aggregation_time("tenant-1", Some(t1), Utc::now())
            .await
            .unwrap());
    }
}
