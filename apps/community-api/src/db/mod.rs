pub mod pool;
pub mod schema;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

/// SQL migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
