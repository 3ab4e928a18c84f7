//! Configuration display.

use console::style;

use webacquire::config::Settings;

/// Print the effective settings (file, defaults and env overrides merged).
pub fn cmd_config(settings: &Settings) -> anyhow::Result<()> {
    match &settings.source_path {
        Some(path) => eprintln!("{} Loaded from {}", style("→").dim(), path.display()),
        None => eprintln!("{} No config file found, using defaults", style("→").dim()),
    }
    print!("{}", settings.to_toml()?);
    Ok(())
}
