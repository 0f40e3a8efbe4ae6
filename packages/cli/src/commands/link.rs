use anyhow::Result;
use colored::Colorize;
use maplink_agent::agent::integration::LinkOutcome;
use maplink_agent::env::keys;
use maplink_agent::LinkRequest;

use crate::context::{spinner, AppContext};

/// Metadata flags; each one overrides its env key
pub struct LinkOptions {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub tool_description: Option<String>,
    pub overwrite: bool,
}

/// Register the deployed agent with the chat UI
pub async fn run(ctx: &AppContext, options: LinkOptions) -> Result<()> {
    let mut store = ctx.store()?;
    store.require(keys::INTEGRATION_REQUIRED)?;

    let request = LinkRequest::from_store(&store)?
        .display_name(options.display_name)
        .description(options.description)
        .tool_description(options.tool_description)
        .overwrite(options.overwrite);
    let manager = ctx.integrations(&store)?;

    let progress = spinner(format!("Linking {}", request.resource))?;
    let result = manager.link(&mut store, request).await;
    progress.finish_and_clear();

    match result? {
        LinkOutcome::Linked(record) => println!(
            "{} Linked {} as {}",
            "✓".green().bold(),
            record.resource,
            record.metadata.display_name.bold()
        ),
        LinkOutcome::Unchanged(record) => println!(
            "{} {} is already linked {}",
            "✓".green().bold(),
            record.resource,
            "(no changes)".dimmed()
        ),
        LinkOutcome::Relinked { previous, record } => println!(
            "{} Linked {} as {} {}",
            "✓".green().bold(),
            record.resource,
            record.metadata.display_name.bold(),
            format!("(replaced {previous})").dimmed()
        ),
    }
    println!("  Confirm with: {} verify", "maplink".dimmed());

    Ok(())
}
