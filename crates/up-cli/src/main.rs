//! up - Crossplane package dependencies and function image builds

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use up_cli::cmd;
use up_cli::ops::Context;
use up_cli::{Cli, Commands, DependencyCommands, FunctionCommands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::load(cli.cache_dir, cli.quiet)?;

    let result = match cli.command {
        Commands::Dependency { command } => match command {
            DependencyCommands::Add {
                package,
                package_type,
                project_file,
            } => cmd::dependency::add(&ctx, &package, package_type.as_deref(), &project_file).await,
            DependencyCommands::UpdateCache { project_file } => {
                cmd::dependency::update_cache(&ctx, &project_file).await
            }
            DependencyCommands::CleanCache => cmd::dependency::clean_cache(&ctx),
        },
        Commands::Function { command } => match command {
            FunctionCommands::Identify { path } => cmd::function::identify(&ctx, &path),
            FunctionCommands::Build {
                names,
                project_file,
                architectures,
                output_dir,
            } => cmd::function::build(&ctx, &project_file, &names, &architectures, &output_dir).await,
        },
    };

    ctx.shutdown();
    result
}
