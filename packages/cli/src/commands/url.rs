use anyhow::Result;
use colored::Colorize;

use super::require_link;
use crate::context::AppContext;

/// Print the chat-UI address alone on stdout, with its verification state
/// on stderr
pub async fn run(ctx: &AppContext) -> Result<()> {
    let mut store = ctx.store()?;
    require_link(&store)?;
    let manager = ctx.integrations(&store)?;

    let address = manager.url(&mut store).await?;
    eprintln!("{}", status_line(address.verified));
    println!("{}", address.url);
    Ok(())
}

/// One-line verification state shown next to the address
fn status_line(verified: bool) -> String {
    if verified {
        format!("{} Verified link", "✓".green().bold())
    } else {
        format!(
            "{} Link not verified yet; run {} verify",
            "!".yellow().bold(),
            "maplink".dimmed()
        )
    }
}
