use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    if is_in_memory(db_url) {
        // Each pooled connection would otherwise open its own empty database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(20)
            .min_connections(2)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800));
    }
    opt.sqlx_logging(true);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("server::entity::*")
        .sync(&db)
        .await?;

    Ok(db)
}

fn is_in_memory(db_url: &str) -> bool {
    db_url.starts_with("sqlite:") && db_url.contains(":memory:")
}
