use bookmanager::{
    args,
    config::BookConfig,
    db::{Migrations, Session, SqliteBookDao},
    service::BookService,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{
    fmt::layer as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = args::config_path().unwrap_or_else(|| PathBuf::from("bookmanager.toml"));
    // This runs before we have a tracing subscriber, so we have to log rudely.
    println!("Startup: loading config file from {:?}", &config_path);
    let config = BookConfig::load(&config_path)?;

    // Set up tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(fmt_layer())
        .init();
    info!("Book Manager starting up");

    let mut session = Session::with_params(config.database.clone());
    let mut migrations = Migrations::new(&mut session);
    if config.validate_migrations {
        migrations.validate().await?;
    } else {
        migrations.run().await?;
    }

    let mut service = BookService::new(Box::new(SqliteBookDao::new(session)));
    let books = service.get_all().await?;
    println!("Book Manager: {} book(s) in the catalog", books.len());
    service.close().await?;

    info!("Book Manager shut down cleanly");
    Ok(())
}
