//! Version-tracked schema migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` reads the
//! highest applied version from `_migrations` and applies the newer ones in
//! order.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                company TEXT NOT NULL,
                normalized_company_key TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,

                linkedin_url TEXT,
                email TEXT,
                company_size_band TEXT,
                funding_stage TEXT,
                enrichment_status TEXT NOT NULL DEFAULT 'pending',
                enrichment_error TEXT,
                enriched_at TEXT,

                seniority_tier TEXT,
                industry_vertical TEXT,
                icp_score INTEGER,
                priority_band TEXT,

                persona_summary TEXT,
                context_hook TEXT,
                themes TEXT NOT NULL DEFAULT '[]',
                confidence_flag TEXT NOT NULL DEFAULT 'LOW',
                needs_human_review INTEGER NOT NULL DEFAULT 0,
                persona_status TEXT NOT NULL DEFAULT 'pending',
                validation_notes TEXT NOT NULL DEFAULT '[]',
                persona_generated_at TEXT,

                owner_role TEXT,
                assigned_owner TEXT,
                sender_level TEXT,
                sequence_variant TEXT,
                leadership_review_required INTEGER NOT NULL DEFAULT 0,
                duplicate_of TEXT,
                routed_at TEXT,

                outreach_status TEXT NOT NULL DEFAULT 'pending',
                in_sequence INTEGER NOT NULL DEFAULT 0,
                current_phase TEXT NOT NULL DEFAULT 'none',
                phase_timestamps TEXT NOT NULL DEFAULT '{}',
                reply_recorded_at TEXT,
                status_note TEXT,
                outreach_history TEXT NOT NULL DEFAULT '[]',

                UNIQUE (normalized_name, normalized_company_key)
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts(normalized_company_key);
            CREATE INDEX IF NOT EXISTS idx_contacts_enrichment ON contacts(enrichment_status);

            CREATE TABLE IF NOT EXISTS routing_cursors (
                owner_role TEXT PRIMARY KEY,
                position INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS company_conflicts (
                company_key TEXT PRIMARY KEY,
                contact_ids TEXT NOT NULL,
                owners TEXT NOT NULL,
                leadership_review INTEGER NOT NULL DEFAULT 0,
                resolved INTEGER NOT NULL DEFAULT 0,
                detected_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "outreach_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_contacts_outreach ON contacts(outreach_status, current_phase);
            CREATE INDEX IF NOT EXISTS idx_contacts_owner ON contacts(assigned_owner);
            CREATE INDEX IF NOT EXISTS idx_conflicts_open ON company_conflicts(resolved);
        "#,
    },
    Migration {
        version: 3,
        name: "capacity_and_email_reveals",
        sql: r#"
            ALTER TABLE contacts ADD COLUMN capacity_overflow INTEGER NOT NULL DEFAULT 0;

            CREATE TABLE IF NOT EXISTS email_reveals (
                month TEXT PRIMARY KEY,
                used INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let final_version = get_current_version(conn).await?;
    tracing::debug!(version = final_version, "Database migrations complete");
    Ok(())
}

/// Highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "contacts",
            "routing_cursors",
            "company_conflicts",
            "email_reveals",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();
        assert_eq!(get_current_version(&conn).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn identity_is_unique() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        let insert = "INSERT INTO contacts (id, name, normalized_name, company, normalized_company_key, source, created_at, updated_at)
                      VALUES (?1, 'Asha', 'asha', 'Acme', 'acme', 'csv', '2026-01-01', '2026-01-01')";
        conn.execute(insert, libsql::params!["a"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["b"]).await.is_err());
    }
}
