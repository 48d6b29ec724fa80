//! List command implementation.

use clap::Args;
use sitepack::config::SitepackConfig;
use sitepack::error::Error;
use sitepack::manifest::ManifestStore;

/// List installed applications.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Show detailed output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self, config: &SitepackConfig) -> sitepack::Result<()> {
        let store = ManifestStore::in_dir(&config.data_dir()?);
        let installs = store.list()?;

        if installs.is_empty() {
            if !self.json {
                println!("No installations found");
            } else {
                println!("[]");
            }
            return Ok(());
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&installs).map_err(|e| Error::Io(e.into()))?
            );
            return Ok(());
        }

        println!(
            "{:<24} {:<12} {:<20} {:<6} {:<30}",
            "PRODUCT", "VERSION", "SITE", "PORT", "PATH"
        );
        println!("{}", "-".repeat(96));

        for m in &installs {
            println!(
                "{:<24} {:<12} {:<20} {:<6} {:<30}",
                truncate(&m.product_code, 22),
                truncate(&m.version, 10),
                truncate(&m.site_name, 18),
                m.port,
                m.install_path.display(),
            );

            if self.verbose {
                println!("  Name: {}", m.display_name);
                println!("  Pool: {}", m.pool_name);
                if !m.host_name.is_empty() {
                    println!("  Host: {}", m.host_name);
                }
                if let Some(u) = &m.uninstaller {
                    println!("  Uninstaller: {}", u.display());
                }
                println!("  Installed: {}", m.installed_at);
                println!();
            }
        }

        Ok(())
    }
}

/// Truncate a string to max characters, adding "..." if needed.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("shop", 10), "shop");
        assert_eq!(truncate("a-very-long-product-code", 10), "a-very-...");
    }
}
