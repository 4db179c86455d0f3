//! Ask command - one question, one answer.

use parley_core::RelayConfig;

use super::respond::respond;
use super::SettingsArgs;

pub(crate) async fn run(relay: &RelayConfig, prompt: &str, settings: &SettingsArgs) -> miette::Result<()> {
    let (session, _catalog, _monitor) = super::open_session(relay, settings).await?;

    respond(&session, prompt)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    Ok(())
}
