use pagesync_capture::TargetHost;

use super::runtime::Runtime;

pub async fn run() -> anyhow::Result<()> {
    let rt = Runtime::build().await?;
    let targets = rt.host.list().await?;

    if targets.is_empty() {
        println!("No open pages.");
        return Ok(());
    }

    println!();
    for target in &targets {
        let marker = if target.is_capturable() { "✓" } else { "✗" };
        let title = if target.title.is_empty() {
            "(untitled)"
        } else {
            target.title.as_str()
        };
        println!("  {} {:<34} {}", marker, target.id.as_str(), title);
        println!("    {}", target.url);
    }
    println!();
    println!("  {} page(s), ✓ = capturable", targets.len());
    Ok(())
}
