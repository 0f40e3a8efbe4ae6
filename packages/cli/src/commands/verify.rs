use anyhow::{bail, Result};
use colored::Colorize;
use maplink_agent::agent::integration::VerifyOutcome;

use super::require_link;
use crate::context::{spinner, AppContext};

/// Check the chat-UI registration against the local record
pub async fn run(ctx: &AppContext) -> Result<()> {
    let mut store = ctx.store()?;
    require_link(&store)?;
    let manager = ctx.integrations(&store)?;

    let progress = spinner("Verifying registration")?;
    let result = manager.verify(&mut store).await;
    progress.finish_and_clear();

    match result? {
        VerifyOutcome::Verified(record) => {
            println!(
                "{} {} is registered as {}",
                "✓".green().bold(),
                record.resource,
                record.metadata.display_name.bold()
            );
            Ok(())
        }
        VerifyOutcome::Failed { reason, .. } => {
            println!("{} Verification failed: {}", "✗".red().bold(), reason);
            println!("  Re-register with: {} link --overwrite", "maplink".dimmed());
            bail!("verification failed: {reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context_with, RESOURCE};
    use crate::exit_status;
    use maplink_agent::MaplinkError;

    #[tokio::test]
    async fn test_verify_before_link_exits_not_linked() {
        let dir = tempfile::tempdir().unwrap();
        // Only the project is configured: no app id, no resource
        let ctx = context_with(dir.path(), "GOOGLE_CLOUD_PROJECT=maps-demo\n");

        let err = run(&ctx).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<MaplinkError>(), Some(MaplinkError::NotLinked(_))));
        assert_eq!(exit_status(&err), 51);
    }

    #[tokio::test]
    async fn test_verify_linked_without_app_exits_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with(
            dir.path(),
            &format!(
                "GOOGLE_CLOUD_PROJECT=maps-demo\nAGENT_ENGINE_RESOURCE_NAME={RESOURCE}\nAGENTSPACE_AGENT_ID=agent-1\n"
            ),
        );

        let err = run(&ctx).await.unwrap_err();
        let Some(MaplinkError::MissingConfig { keys }) = err.downcast_ref::<MaplinkError>() else {
            panic!("expected missing config, got {err:#}");
        };
        assert!(keys.contains(&"AGENTSPACE_APP_ID".to_string()));
        assert!(!keys.contains(&"AGENT_ENGINE_RESOURCE_NAME".to_string()));
        assert_eq!(exit_status(&err), 11);
    }
}
