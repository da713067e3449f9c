use std::sync::Arc;
use std::time::Duration;

use nodehost_supervisor::{
    ConfigOptions, DirAssetSource, NodeConfig, Supervisor, SupervisorOptions, ensure_config,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for better logging
    tracing_subscriber::fmt::init();

    // Asset pack directory holding the per-architecture daemon binaries,
    // overridable for local experimentation.
    let asset_dir = std::env::var("NODEHOST_ASSETS").unwrap_or_else(|_| "/tmp/nodehost-assets".into());

    let config = NodeConfig::new(
        "/tmp/nodehost/node.conf",
        "/tmp/nodehost/nodedata",
        "/tmp/nodehost",
    )?;

    println!(
        "Starting daemon with data in '{}' and config at '{}'",
        config.data_dir.display(),
        config.config_file.display()
    );

    // Write the configuration template, preserving any existing credentials
    let credentials = ensure_config(&config.config_file, &ConfigOptions::default())?;
    println!("RPC user: {}", credentials.user);

    // Create and start the supervisor
    let supervisor = Supervisor::native(SupervisorOptions {
        asset_source: Arc::new(DirAssetSource::new(asset_dir)),
        grace_period: Duration::from_secs(30),
        capture_output: true,
    })?;
    supervisor.start(&config).await?;

    println!("Daemon is running (state {})", supervisor.status());

    // Keep the daemon running until user interrupts with Ctrl+C
    println!("\nPress Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;

    // Shutdown the daemon when done
    println!("Shutting down daemon...");
    supervisor.stop().await?;
    println!("Daemon shutdown complete (state {})", supervisor.status());

    Ok(())
}
