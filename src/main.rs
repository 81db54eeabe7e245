use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use catalog_sync::cli::{demo, stats};
use catalog_sync::config::CatalogConfig;
use catalog_sync::database_ops::catalog::CatalogSync;
use catalog_sync::database_ops::db::Db;
use catalog_sync::database_ops::store::DocumentStore;
use catalog_sync::logging::{init_tracing, DEFAULT_FILTER};
use catalog_sync::util::env::{init_env, redact_url};

#[derive(Parser, Debug)]
#[command(name = "catalog-sync", version, about = "Catalog snapshot sync tool")]
struct Cli {
    /// Document store URL (overrides CATALOG_DATABASE_URL)
    #[arg(long, global = true)]
    db_url: Option<String>,
    /// Catalog API base URL (overrides CATALOG_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Replace categories, then products per category
    Sync,
    /// Replace the categories collection only
    Categories,
    /// Replace products for every stored category
    Products,
    /// Print counts and aggregates for the stored catalog
    Stats,
    /// Create a secondary index on a document field
    Index {
        #[arg(long)]
        field: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Run the CRUD walkthrough against the products collection
    Demo {
        #[arg(long)]
        collection: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let mut config = CatalogConfig::from_env()?;
    if let Some(url) = cli.db_url {
        config.database_url = url;
    }
    if let Some(base) = cli.api_base.as_deref() {
        config = config.with_api_base(base)?;
    }
    config.log_snapshot();

    info!(url = %redact_url(&config.database_url), "connecting");
    let db = Db::connect(&config.database_url).await?;
    let result = dispatch(cli.command, &config, &db).await;
    db.close().await;

    if let Err(err) = &result {
        error!(error = %err, "catalog-sync failed");
    }
    result
}

async fn dispatch(command: Commands, config: &CatalogConfig, db: &Db) -> Result<()> {
    let options = config.sync_options();
    let sync = || -> Result<CatalogSync<Db>> {
        Ok(CatalogSync::new(db.clone(), config.provider()?).with_options(options.clone()))
    };

    match command {
        Commands::Sync => {
            let report = sync()?.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Categories => {
            let report = sync()?.sync_categories().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Products => {
            let report = sync()?.sync_products().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats => stats::run(db, &options).await?,
        Commands::Index { field, collection } => {
            let collection = collection.unwrap_or_else(|| options.products_collection.clone());
            db.create_index(&collection, &field).await?;
            info!(collection = %collection, field = %field, "index ready");
        }
        Commands::Demo { collection } => {
            let collection = collection.unwrap_or_else(|| options.products_collection.clone());
            let summary = demo::run(db, &collection).await?;
            info!(total = summary.total, "demo finished");
        }
    }
    Ok(())
}
