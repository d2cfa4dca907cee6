//! Config command implementations
//!
//! Keys are dotted `section.field` paths into the TOML file, e.g.
//! `service.port` or `backend.company_id`.

use anyhow::{Context, Result};

use pb_core::config::{self, BridgeConfig};

use super::CliContext;
use crate::output::{print_error, print_info, print_success, print_warning};

const SECTIONS: &[&str] = &["backend", "service", "timeouts"];

/// Full effective configuration as a TOML table
fn effective_table(ctx: &CliContext) -> Result<toml::Table> {
    let config = ctx.load_config()?;
    let content = toml::to_string(&config).context("Failed to serialize configuration")?;
    toml::from_str(&content).context("Failed to re-read configuration")
}

/// Split `section.field`, rejecting unknown sections
fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if SECTIONS.contains(&section) && !field.is_empty() => {
            Ok((section, field))
        }
        _ => anyhow::bail!(
            "Invalid key {:?}: expected one of {} followed by .<field>",
            key,
            SECTIONS.join(", ")
        ),
    }
}

/// Parse a command-line value into the closest TOML type
fn parse_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if value.starts_with('[') {
        toml::from_str::<toml::Table>(&format!("v = {}", value))
            .ok()
            .and_then(|mut t| t.remove("v"))
            .unwrap_or_else(|| toml::Value::String(value.to_string()))
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Print one config value, overrides and defaults included
pub fn config_get(ctx: &CliContext, key: &str) -> Result<()> {
    let (section, field) = split_key(key)?;
    let table = effective_table(ctx)?;

    let value = table
        .get(section)
        .and_then(|s| s.as_table())
        .and_then(|s| s.get(field));
    match value {
        Some(toml::Value::String(s)) => println!("{}", s),
        Some(other) => println!("{}", other),
        None => print_error(&format!("Key not set: {}", key)),
    }
    Ok(())
}

/// Set one config value in the file
///
/// The edited file must still load as a valid configuration, otherwise it
/// is left untouched.
pub fn config_set(ctx: &CliContext, key: &str, value: &str) -> Result<()> {
    let (section, field) = split_key(key)?;
    let path = ctx.config_path();

    // String fields take the raw text even when it looks like a number
    let effective = effective_table(ctx)?;
    let existing = effective
        .get(section)
        .and_then(|s| s.as_table())
        .and_then(|s| s.get(field));
    let parsed = match existing {
        Some(toml::Value::String(_)) => toml::Value::String(value.to_string()),
        _ => parse_value(value),
    };

    let mut table: toml::Table = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        toml::Table::new()
    };

    let section_table = table
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{}] is not a table in {:?}", section, path))?;
    section_table.insert(field.to_string(), parsed);

    let new_content = toml::to_string_pretty(&table)?;
    toml::from_str::<BridgeConfig>(&new_content)
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    std::fs::write(&path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show the effective configuration
pub fn config_show(ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path();
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file at {:?}, showing defaults", path));
    }
    println!();

    let mut config = ctx.load_config()?;
    if !config.backend.api_token.is_empty() {
        config.backend.api_token = "********".to_string();
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Print the config file path
pub fn config_path(ctx: &CliContext) -> Result<()> {
    println!("{}", ctx.config_path().display());
    Ok(())
}

/// Write a default config file
pub fn config_init(ctx: &CliContext, force: bool) -> Result<()> {
    let path = ctx.config_path();
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &BridgeConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Set the backend credentials with 'pdv-bridge config set backend.<field> <value>'");
    Ok(())
}
