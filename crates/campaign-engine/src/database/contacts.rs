//! Contact-list operations
//!
//! List CRUD itself belongs to an external collaborator; these operations
//! exist so embedders and tests can seed lists and so the dial loop can walk
//! contacts in position order.

use anyhow::Result;
use sqlx::Row;

use super::{Contact, ContactList, Store};

/// Contact fields as handed in by the ingestion collaborator
#[derive(Debug, Clone)]
pub struct NewContact {
    pub number: String,
    pub first_name: Option<String>,
    pub email: Option<String>,
    /// Arbitrary dynamic fields (tag, language, account ids, ...)
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Store {
    pub async fn insert_contact_list(
        &self,
        list_id: &str,
        tenant_id: &str,
        name: &str,
        contacts: &[NewContact],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO contact_lists (list_id, tenant_id, name, contact_count)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(list_id) DO UPDATE SET
                name = excluded.name, contact_count = excluded.contact_count",
        )
        .bind(list_id)
        .bind(tenant_id)
        .bind(name)
        .bind(contacts.len() as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM contacts WHERE list_id = ?")
            .bind(list_id)
            .execute(&mut *tx)
            .await?;

        for (position, contact) in contacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO contacts (list_id, position, number, first_name, email, fields)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(list_id)
            .bind(position as i64)
            .bind(&contact.number)
            .bind(&contact.first_name)
            .bind(&contact.email)
            .bind(serde_json::to_string(&contact.fields)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_contact_list(&self, list_id: &str) -> Result<Option<ContactList>> {
        let row = sqlx::query(
            "SELECT list_id, tenant_id, name, contact_count FROM contact_lists WHERE list_id = ?",
        )
        .bind(list_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ContactList::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// The contact at one position of a list; the dial loop fetches one at a
    /// time so a resumed campaign never re-reads stale pages.
    pub async fn get_contact(&self, list_id: &str, position: i64) -> Result<Option<Contact>> {
        let row = sqlx::query(
            "SELECT list_id, position, number, first_name, email, fields
             FROM contacts WHERE list_id = ? AND position = ?",
        )
        .bind(list_id)
        .bind(position)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Contact::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn count_contacts(&self, list_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM contacts WHERE list_id = ?")
            .bind(list_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}
