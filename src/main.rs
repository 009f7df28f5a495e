use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{self, Cli, Session};
use gator::config::{self, Config};
use gator::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let config = Config::load(&config_path)?;
    debug!(path = %config_path.display(), "Loaded configuration");

    // Initialize database
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.db_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;

    let mut session = Session::new(db, config, config_path);
    let mut stdout = std::io::stdout();
    commands::run(&mut session, cli.command, &mut stdout).await
}
