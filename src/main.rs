//! BrandPulse operator binary

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use clap::Parser;

    use brandpulse::cli::{Cli, run_cli_command};
    use brandpulse::config::load_config;

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let _guard = brandpulse::system::init_logging(&config.logging)
        .context("Failed to initialize logging")?;

    if let Err(e) = run_cli_command(cli.command).await {
        eprintln!("{}", e.format_colored());
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("brandpulse was built without the `cli` feature; use it as a library.");
}
