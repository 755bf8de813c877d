use webpilot_core::Paths;
use webpilot_storage::SelectorStore;

use crate::MemoryCommands;

pub fn run(command: MemoryCommands) -> anyhow::Result<()> {
    let paths = Paths::new();
    let store = SelectorStore::open(&paths.memory_db())?;

    match command {
        MemoryCommands::Stats => {
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        MemoryCommands::Top { limit } => {
            let domains = store.top_domains(limit)?;
            if domains.is_empty() {
                println!("No action history recorded yet.");
                return Ok(());
            }
            println!("{:<30} {:>8} {:>8} {:>9}", "DOMAIN", "ACTIONS", "OK", "RATE");
            for d in domains {
                println!(
                    "{:<30} {:>8} {:>8} {:>8.1}%",
                    d.domain, d.total_actions, d.successful_actions, d.success_rate
                );
            }
        }
        MemoryCommands::Domain { domain } => {
            let stats = store.domain_stats(&domain)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        MemoryCommands::Similar {
            domain,
            description,
            limit,
        } => {
            let records = store.similar_selectors(&domain, &description, limit)?;
            if records.is_empty() {
                println!("No similar selectors known for '{}' on {}.", description, domain);
                return Ok(());
            }
            for r in records {
                println!(
                    "{:>4}×  {:<40} {}",
                    r.success_count, r.selector, r.description
                );
            }
        }
        MemoryCommands::Export { output } => {
            let path = match output {
                Some(p) => std::path::PathBuf::from(p),
                None => paths.exports_dir().join("selectors.json"),
            };
            let count = store.export(&path)?;
            println!("Exported {} selectors to {}", count, path.display());
        }
        MemoryCommands::Cleanup { days } => {
            let removed = store.cleanup_history(days)?;
            println!("Removed {} history rows older than {} days.", removed, days);
        }
    }

    Ok(())
}
