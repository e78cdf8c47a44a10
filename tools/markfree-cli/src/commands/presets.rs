//! Print the region presets in effect.

use markfree_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, save: bool) -> anyhow::Result<()> {
    println!("Region presets ({})", config_file_path().display());
    println!("{}", serde_json::to_string_pretty(&config.regions)?);

    if save {
        config.save()?;
        println!("Config written to {}", config_file_path().display());
    }
    Ok(())
}
