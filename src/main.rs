use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chapterline::app::AppContext;
use chapterline::cli::{commands, CacheAction, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::new(cli.workers)?;

    match cli.command {
        Commands::Pages { path } => {
            commands::list_pages(&ctx, &path).await?;
        }
        Commands::Extract { path, index, out } => {
            commands::extract_page(&ctx, &path, index, &out).await?;
        }
        Commands::Read { dir } => {
            commands::read_manga(&ctx, &dir).await?;
        }
        Commands::Remote { base_url, chapter } => {
            commands::read_remote(&ctx, &base_url, &chapter).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => commands::clear_cache(&ctx)?,
        },
    }

    Ok(())
}
