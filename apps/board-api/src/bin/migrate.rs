//! Standalone migration runner for board-api.
//!
//! Usage:
//!   cargo run -p board-api --bin board-migrate
//!   cargo run -p board-api --bin board-migrate -- --test
//!   cargo run -p board-api --bin board-migrate -- --pending
//!
//! `--test` targets the `<db>_test` database; `--pending` lists what would be
//! applied without applying it. Reads DATABASE_URL from the environment (or
//! .env via dotenvy).

use std::path::Path;

use diesel::migration::Migration;
use diesel::pg::{Pg, PgConnection};
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[derive(Debug, Default, PartialEq)]
struct Options {
    test_db: bool,
    pending_only: bool,
}

impl Options {
    fn parse(args: impl Iterator<Item = String>) -> Self {
        let mut options = Options::default();
        for arg in args {
            match arg.as_str() {
                "--test" => options.test_db = true,
                "--pending" => options.pending_only = true,
                other => eprintln!("ignoring unknown argument {other}"),
            }
        }
        options
    }
}

fn main() {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let options = Options::parse(std::env::args().skip(1));
    let mut database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var is required");
    if options.test_db {
        database_url = test_database_url(&database_url);
    }

    println!("Connecting to database...");
    let mut conn =
        PgConnection::establish(&database_url).expect("failed to connect to database");

    if options.pending_only {
        let pending = conn
            .pending_migrations(MIGRATIONS)
            .expect("failed to list migrations");
        if pending.is_empty() {
            println!("Schema is up to date.");
        }
        for migration in &pending {
            let migration: &dyn Migration<Pg> = migration.as_ref();
            println!("  Pending: {}", migration.name());
        }
        return;
    }

    println!("Running pending migrations...");
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");

    if applied.is_empty() {
        println!("No pending migrations.");
    } else {
        for migration in &applied {
            println!("  Applied: {migration}");
        }
        println!("{} migration(s) applied.", applied.len());
    }
}

/// Point a Postgres URL at the sibling `_test` database, keeping any query
/// string. URLs already ending in `_test` are returned unchanged.
fn test_database_url(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((prefix, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    match query {
        Some(query) => format!("{prefix}/{db_name}_test?{query}"),
        None => format!("{prefix}/{db_name}_test"),
    }
}
