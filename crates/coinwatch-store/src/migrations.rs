use ::duckdb::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_records (
    record_key VARCHAR PRIMARY KEY,
    body VARCHAR NOT NULL,
    expires_at BIGINT
);
";

/// Create the record table if it does not exist yet.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(SCHEMA)
}
