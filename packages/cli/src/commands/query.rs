use anyhow::Result;
use colored::Colorize;
use maplink_agent::env::keys;
use maplink_agent::{QueryClient, ResourceIdentifier};
use std::io::Write;

use crate::context::AppContext;

/// Send one message to the deployed agent and print its answer
pub async fn run(ctx: &AppContext, message: Option<String>, no_stream: bool) -> Result<()> {
    let store = ctx.store()?;
    store.require(&[keys::RESOURCE_NAME])?;
    let resource: ResourceIdentifier = store.get_or(keys::RESOURCE_NAME, "").parse()?;
    let message = message.unwrap_or_else(|| ctx.settings.smoke_query.clone());

    let deployments = ctx.deployments(&store)?;
    println!("{} {}", "→".blue().bold(), message.dimmed());

    let mut print_chunk = |chunk: &str| {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    };
    let report = QueryClient::new(&deployments)
        .with_streaming(!no_stream)
        .query_smoke_with_progress(&resource, &message, &mut print_chunk)
        .await?;

    println!();
    println!(
        "{} {} fragments in {:.1}s",
        "✓".green().bold(),
        report.fragments,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
