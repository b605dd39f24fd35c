//! `hoard config`: show the effective configuration or edit the config file.

use crate::output::Output;
use anyhow::{Context, Result, anyhow, bail};
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use hoard_core::HoardConfig;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Text,
    PathList,
    Integer,
}

const KEYS: &[(&str, Kind)] = &[
    ("cache_root", Kind::Text),
    ("registry_path", Kind::Text),
    ("hub_cache_dir", Kind::Text),
    ("ollama_dir", Kind::Text),
    ("hf_endpoint", Kind::Text),
    ("hf_revision", Kind::Text),
    ("import_roots", Kind::PathList),
    ("download.max_retries", Kind::Integer),
    ("download.retry_base_delay_ms", Kind::Integer),
    ("download.timeout_secs", Kind::Integer),
];

fn kind_of(key: &str) -> Result<Kind> {
    KEYS.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            let known: Vec<&str> = KEYS.iter().map(|(k, _)| *k).collect();
            anyhow!(
                "unknown configuration key '{key}' (known keys: {})",
                known.join(", ")
            )
        })
}

pub fn handle(path: &Path, key: Option<&str>, value: Option<&str>, out: &Output) -> Result<()> {
    match (key, value) {
        (None, _) => out.config_table(&effective(path)?),
        (Some(key), None) => {
            kind_of(key)?;
            let value = lookup(&effective(path)?, key)
                .ok_or_else(|| anyhow!("'{key}' is not set"))?;
            out.config_value(key, &value)
        }
        (Some(key), Some(value)) => {
            let value = set(path, key, value)?;
            tracing::info!(path = %path.display(), key, "Updated configuration");
            out.config_value(key, &value)
        }
    }
}

/// The loaded configuration, with derived defaults filled in.
fn effective(path: &Path) -> Result<toml::Table> {
    let config = HoardConfig::load(path)?;
    let registry_path = config.registry_path();
    let toml::Value::Table(mut table) =
        toml::Value::try_from(&config).context("failed to render configuration")?
    else {
        bail!("configuration did not render as a table");
    };
    table.insert(
        "registry_path".to_string(),
        toml::Value::String(registry_path.display().to_string()),
    );
    Ok(table)
}

fn lookup(table: &toml::Table, key: &str) -> Option<toml::Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current.clone())
}

fn parse_value(key: &str, raw: &str) -> Result<toml::Value> {
    Ok(match kind_of(key)? {
        Kind::Text => toml::Value::String(raw.to_string()),
        Kind::Integer => toml::Value::Integer(
            raw.parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| anyhow!("'{key}' must be a non-negative integer, got '{raw}'"))?,
        ),
        Kind::PathList => toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| toml::Value::String(p.to_string()))
                .collect(),
        ),
    })
}

/// Write `key = value` into the config file after checking the result still loads.
fn set(path: &Path, key: &str, raw: &str) -> Result<toml::Value> {
    let value = parse_value(key, raw)?;

    let mut table = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        text.parse::<toml::Table>()
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        toml::Table::new()
    };

    let (section, leaf) = match key.split_once('.') {
        Some((section, leaf)) => (Some(section), leaf),
        None => (None, key),
    };
    let target = match section {
        None => &mut table,
        Some(section) => table
            .entry(section)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow!("'{section}' in {} is not a table", path.display()))?,
    };
    target.insert(leaf.to_string(), value.clone());

    let text = toml::to_string_pretty(&table)?;
    let candidate: HoardConfig = Figment::from(Serialized::defaults(HoardConfig::default()))
        .merge(Toml::string(&text))
        .extract()
        .map_err(|e| anyhow!("invalid value for '{key}': {e}"))?;
    candidate.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(value)
}
