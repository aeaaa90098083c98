use rusqlite::Connection;

/// Initialize the database schema
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- License activation records, one per license key.
        -- license_key is NULL only for a subscription that arrived before its key
        -- (placeholder keyed by order_id until license_key_created fills it in).
        -- Never hard-deleted: superseded records are marked expired.
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT UNIQUE,
            order_id TEXT,
            order_item_id TEXT,
            variant TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'expired', 'inactive')),
            device_id TEXT,
            last_device_switch_at INTEGER,
            switch_count INTEGER NOT NULL DEFAULT 0 CHECK (switch_count >= 0),
            expires_at INTEGER,
            created_at INTEGER NOT NULL,
            activated_at INTEGER,
            subscribed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_order ON licenses(order_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_device_status ON licenses(device_id, status);

        -- Append-only usage ledger; totals are SUM(quantity) per license_key
        CREATE TABLE IF NOT EXISTS usage_records (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL,
            device_id TEXT,
            plan TEXT NOT NULL,
            variant TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_records_key ON usage_records(license_key);

        -- Analytics events from the extension
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            event TEXT NOT NULL,
            license_key TEXT,
            plan TEXT,
            email TEXT,
            extension_version TEXT,
            browser TEXT,
            draft_id TEXT,
            metadata TEXT,
            occurred_at INTEGER,
            recorded_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_name ON events(event, recorded_at);
        "#,
    )
}
