use anyhow::{Context, Result};
use tracing::info;

use grantstore_db_postgres::mask_password;

use crate::commands::App;
use crate::output::print_success;
use crate::settings::Settings;

/// Prepares token, client and user collections.
pub async fn init(app: &App) -> Result<()> {
    app.enforcer()
        .configure()
        .await
        .context("failed to prepare token collections")?;
    for collection in [app.clients.collection(), app.users.collection()] {
        app.backend
            .ensure_collection(collection)
            .await
            .with_context(|| format!("failed to prepare {collection}"))?;
    }
    print_success(&format!(
        "Collections ready on the {} backend",
        app.backend.backend_name()
    ));
    Ok(())
}

/// Reaps once, or until Ctrl-C.
pub async fn reap(app: &App, once: bool) -> Result<()> {
    let enforcer = app.enforcer();
    enforcer.configure().await?;

    if once {
        let removed = enforcer.reap_once().await?;
        print_success(&format!("Removed {removed} expired records"));
        return Ok(());
    }

    let handle = enforcer.start();
    info!("Reaper running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    handle.stop().await;
    print_success("Reaper stopped");
    Ok(())
}

/// Prints the merged settings with the database password masked.
pub fn show_config(settings: &Settings) -> Result<()> {
    let mut settings = settings.clone();
    settings.storage.postgres.url = mask_password(&settings.storage.postgres.url);
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}
