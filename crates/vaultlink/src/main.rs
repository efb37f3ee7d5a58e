use std::sync::Arc;

use vaultlink_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), vaultlink_core::Error> {
    vaultlink_core::logging::init("vaultlink")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        data_file = %cfg.data_file.display(),
        auto_delete_secs = cfg.auto_delete.map(|d| d.as_secs()).unwrap_or(0),
        "config loaded"
    );

    vaultlink_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| vaultlink_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
