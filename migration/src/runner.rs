use colored::*;
use migration::Migrator;
use sea_orm_migration::prelude::*;
use std::io::{self, Write};
use std::time::Instant;

const STATUS_COLUMN: usize = 80;

pub async fn run_all_migrations(url: &str) {
    let db = match sea_orm::Database::connect(url).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("{} {e}", "DB connection failed:".red());
            std::process::exit(1);
        }
    };

    let pending = match Migrator::get_pending_migrations(&db).await {
        Ok(pending) => pending,
        Err(e) => {
            eprintln!("{} {e}", "Could not read migration status:".red());
            std::process::exit(1);
        }
    };

    if pending.is_empty() {
        println!("Schema is up to date.");
        return;
    }

    println!("Running migrations...");
    for migration in pending {
        let name_str = format!("Applying {}", migration.name().bold());
        let dots = ".".repeat(STATUS_COLUMN.saturating_sub(name_str.len()));
        print!("{}{} ", name_str, dots);
        let _ = io::stdout().flush();

        let start = Instant::now();
        match Migrator::up(&db, Some(1)).await {
            Ok(()) => {
                let time_str = format!("({:.2?})", start.elapsed()).dimmed();
                println!("{} {}", "done".green(), time_str);
            }
            Err(e) => {
                println!("{}", "failed".red());
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
}
