use anyhow::Result;
use colored::Colorize;
use maplink_agent::agent::definition::{AgentDefinition, MapsToolset};
use maplink_agent::env::keys;
use maplink_agent::runtime::adapter::Removal;
use maplink_agent::{
    DeployPhase, DeploymentClient, Packager, QueryClient, ResourceIdentifier, VertexAdapter,
};

use crate::context::{spinner, AppContext};

/// Package the maps assistant and deploy it to Agent Engine
pub async fn run(ctx: &AppContext, smoke: bool, delete_after: bool) -> Result<()> {
    let mut store = ctx.store()?;
    store.require(keys::DEPLOY_REQUIRED)?;

    let toolset = MapsToolset::new(store.get(keys::MAPS_API_KEY));
    let definition = AgentDefinition::maps_assistant(store.get(keys::MODEL), &toolset);
    let display_name = store
        .get_or(keys::DISPLAY_NAME, keys::DEFAULT_DISPLAY_NAME)
        .to_string();
    let unit = Packager::default().package(&definition, &toolset, &display_name)?;
    let deployments = ctx.deployments(&store)?;

    match store.get(keys::RESOURCE_NAME) {
        Some(existing) => println!("{} Updating {}", "→".blue().bold(), existing),
        None => println!("{} Deploying {}", "→".blue().bold(), display_name.bold()),
    }

    let progress = spinner("Deployment pending")?;
    let mut observe = |phase: DeployPhase| progress.set_message(format!("Deployment {phase}"));
    let deployment = match deployments
        .deploy_recorded(&mut store, unit, &mut observe)
        .await
    {
        Ok(deployment) => deployment,
        Err(e) => {
            progress.finish_and_clear();
            return Err(e.into());
        }
    };
    progress.finish_with_message(format!(
        "{} Deployed {}",
        "✓".green().bold(),
        deployment.resource
    ));

    let smoke_result = if smoke {
        smoke_query(&deployments, &deployment.resource, &ctx.settings.smoke_query).await
    } else {
        Ok(())
    };

    if delete_after {
        let (resource, removal) = deployments.undeploy_recorded(&mut store).await?;
        let note = match removal {
            Removal::Removed => "deleted",
            Removal::NotFound => "already gone",
        };
        println!("{} {} {}", "✓".green().bold(), resource, note.dimmed());
        return smoke_result;
    }
    smoke_result?;

    println!();
    println!("  Next steps:");
    for (command, what) in [
        ("link", "register the agent with the chat UI"),
        ("verify", "confirm the registration"),
        ("url", "print the chat UI address"),
        ("test-query", "send a sample question"),
    ] {
        println!("    {} {:<12} {}", "maplink".dimmed(), command, what.dimmed());
    }

    Ok(())
}

async fn smoke_query(
    deployments: &DeploymentClient<VertexAdapter>,
    resource: &ResourceIdentifier,
    message: &str,
) -> Result<()> {
    let progress = spinner("Running smoke query")?;
    let result = QueryClient::new(deployments).query_smoke(resource, message).await;
    progress.finish_and_clear();

    let report = result?;
    println!(
        "{} Smoke query answered ({} fragments in {:.1}s)",
        "✓".green().bold(),
        report.fragments,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
