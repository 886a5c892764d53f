//! Where a command is applied: the running orchestrator, or the ledger itself.

use anyhow::Result;
use rdo_core::control::default_control_socket_path;
use rdo_core::Ledger;

use super::control_socket::ControlClient;

pub enum Target {
    /// `rdo run` is serving the control socket.
    Orchestrator(ControlClient),
    /// Nobody is running; ledger-only commands go straight to the database.
    Ledger(Ledger),
}

impl Target {
    pub async fn connect() -> Result<Self> {
        if let Some(client) = connect_orchestrator().await? {
            return Ok(Target::Orchestrator(client));
        }
        tracing::debug!("no orchestrator listening; using the ledger directly");
        Ok(Target::Ledger(Ledger::open_default().await?))
    }
}

/// Client for the running orchestrator, if any.
pub async fn connect_orchestrator() -> Result<Option<ControlClient>> {
    let path = default_control_socket_path()?;
    ControlClient::connect(&path).await
}
