use anyhow::Result;
use stash_axum::app::{DEFAULT_HOST, DEFAULT_PORT};
use stash_core::StashConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = StashConfig::from_env("STASH__");
    let snapshot = config.snapshot();

    let host = snapshot.get_string("http.host").unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = snapshot.get_u64("http.port").unwrap_or(DEFAULT_PORT as u64);
    let addr = format!("{host}:{port}");

    let app = stash_axum::build(&config).await?;
    println!("[stash] listening on http://{addr}");

    app.listen(addr).await?;

    Ok(())
}
