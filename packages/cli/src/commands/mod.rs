use anyhow::Result;
use maplink_agent::env::keys;
use maplink_agent::{EnvStore, IntegrationRecord, LinkStatus, MaplinkError};

pub mod deploy;
pub mod link;
pub mod query;
pub mod status;
pub mod undeploy;
pub mod unlink;
pub mod url;
pub mod verify;

/// Fail with `NotLinked` unless `store` records a link, then check the
/// settings the chat-UI client needs
pub fn require_link(store: &EnvStore) -> Result<()> {
    let not_linked = match IntegrationRecord::load(store)? {
        Some(record) if record.status != LinkStatus::Unlinked => None,
        Some(record) => Some(format!("{} is not linked", record.resource)),
        None => Some("no deployed resource is recorded".to_string()),
    };
    if let Some(reason) = not_linked {
        return Err(MaplinkError::NotLinked(reason).into());
    }
    store.require(keys::LINKED_REQUIRED)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use crate::context::AppContext;
    use crate::settings::Settings;

    pub const RESOURCE: &str = "projects/123/locations/us-central1/reasoningEngines/abc";

    /// Context over an env file in `dir` holding `content`
    pub fn context_with(dir: &Path, content: &str) -> AppContext {
        let env_file = dir.join(".env");
        std::fs::write(&env_file, content).unwrap();
        AppContext::new(Settings::default(), env_file)
    }
}
