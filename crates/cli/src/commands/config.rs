//! Config commands

use anyhow::{Context, Result, bail};
use std::path::Path;
use tracesync_core::Config;

/// Show current effective configuration
pub fn cmd_config_show(explicit: Option<&Path>, config: &Config) -> Result<()> {
  match explicit {
    Some(path) => println!("Using config: {:?}", path),
    None => match Config::user_config_path() {
      Some(path) if path.exists() => println!("Using user config: {:?}", path),
      _ => println!("Using default configuration (no config file found)"),
    },
  }
  println!();

  let toml_str = toml::to_string_pretty(config).context("Failed to render config")?;
  println!("{}", toml_str);
  Ok(())
}

/// Write the commented default config file
pub fn cmd_config_init(explicit: Option<&Path>, force: bool) -> Result<()> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => Config::user_config_path().context("No config directory available")?,
  };

  if path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", path);
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
  }
  std::fs::write(&path, Config::generate_template()).with_context(|| format!("Failed to write {:?}", path))?;

  println!("Created config: {:?}", path);
  println!("The tier directories it names must exist before the first cycle.");
  Ok(())
}

/// Print where the config file is looked up
pub fn cmd_config_path(explicit: Option<&Path>) -> Result<()> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => Config::user_config_path().context("No config directory available")?,
  };
  println!("{}", path.display());
  Ok(())
}
