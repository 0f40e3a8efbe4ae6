use anyhow::Result;
use colored::{ColoredString, Colorize};
use maplink_agent::env::keys;
use maplink_agent::{IntegrationRecord, LinkStatus};

use crate::context::AppContext;

/// Show the deployment and link record kept in the env file
pub async fn run(ctx: &AppContext) -> Result<()> {
    let store = ctx.store()?;

    println!("{}", "Maplink".bold());
    println!("{}", "─".repeat(70));
    println!("  {:<14} {}", "ENV FILE".dimmed(), ctx.env_file.display());
    println!(
        "  {:<14} {}",
        "DEPLOYMENT".dimmed(),
        store.get(keys::RESOURCE_NAME).unwrap_or("(not deployed)")
    );

    match IntegrationRecord::load(&store)? {
        Some(record) => {
            println!("  {:<14} {}", "LINK".dimmed(), colored_status(record.status));
            if record.status.is_linked() || record.status == LinkStatus::VerificationFailed {
                println!("  {:<14} {}", "LINKED".dimmed(), record.resource);
                println!("  {:<14} {}", "DISPLAY NAME".dimmed(), record.metadata.display_name);
            }
            if let Some(agent_id) = &record.agent_id {
                println!("  {:<14} {}", "AGENT ID".dimmed(), agent_id);
            }
            if let Some(linked_at) = record.linked_at {
                println!(
                    "  {:<14} {}",
                    "SINCE".dimmed(),
                    linked_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            if let Some(url) = &record.ui_url {
                println!("  {:<14} {}", "URL".dimmed(), url.cyan());
            }
        }
        None => println!("  {:<14} {}", "LINK".dimmed(), "(none)".dimmed()),
    }
    println!("{}", "─".repeat(70));

    let missing = store.missing(keys::INTEGRATION_REQUIRED);
    if !missing.is_empty() {
        println!(
            "  {} link needs {}",
            "!".yellow().bold(),
            missing.join(", ")
        );
    }

    Ok(())
}

fn colored_status(status: LinkStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        LinkStatus::Verified => label.green(),
        LinkStatus::Linked => label.cyan(),
        LinkStatus::VerificationFailed => label.red(),
        LinkStatus::Unlinked => label.dimmed(),
    }
}
