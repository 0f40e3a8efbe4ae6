use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use maplink_agent::agent::integration::UnlinkOutcome;

use crate::context::{spinner, AppContext};

/// Remove the chat-UI registration and reset the local record
pub async fn run(ctx: &AppContext, force: bool) -> Result<()> {
    let mut store = ctx.store()?;
    let manager = ctx.integrations(&store)?;

    if !force {
        let target = manager
            .status(&store)?
            .map(|record| record.resource.to_string())
            .unwrap_or_else(|| "the agent".to_string());
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {target} from the chat UI?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    let progress = spinner("Unlinking")?;
    let result = manager.unlink(&mut store).await;
    progress.finish_and_clear();

    match result? {
        UnlinkOutcome::Unlinked => println!("{} Unlinked", "✓".green().bold()),
        UnlinkOutcome::AlreadyAbsent => println!(
            "{} Unlinked {}",
            "✓".green().bold(),
            "(registration was already gone)".dimmed()
        ),
    }
    Ok(())
}
