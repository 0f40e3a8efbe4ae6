use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use maplink_agent::env::keys;
use maplink_agent::runtime::adapter::Removal;
use maplink_agent::IntegrationRecord;

use crate::context::{spinner, AppContext};

/// Delete the deployed agent and forget its resource name
pub async fn run(ctx: &AppContext, force: bool) -> Result<()> {
    let mut store = ctx.store()?;
    store.require(&[keys::RESOURCE_NAME])?;
    let resource = store.get_or(keys::RESOURCE_NAME, "").to_string();

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {resource}?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    let still_linked = IntegrationRecord::load(&store)?
        .map(|record| record.status.is_linked() && record.resource.to_string() == resource)
        .unwrap_or(false);

    let deployments = ctx.deployments(&store)?;
    let progress = spinner(format!("Deleting {resource}"))?;
    let result = deployments.undeploy_recorded(&mut store).await;
    progress.finish_and_clear();

    let (resource, removal) = result?;
    match removal {
        Removal::Removed => println!("{} Deleted {}", "✓".green().bold(), resource),
        Removal::NotFound => println!(
            "{} {} was already gone",
            "✓".green().bold(),
            resource
        ),
    }
    if still_linked {
        println!(
            "  The chat UI still lists it: {} unlink",
            "maplink".dimmed()
        );
    }

    Ok(())
}
