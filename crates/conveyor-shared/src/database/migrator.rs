//! Embedded migrator, also referenced by `#[sqlx::test]` suites.

/// Compile-time embedded migrations for the conveyor schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
