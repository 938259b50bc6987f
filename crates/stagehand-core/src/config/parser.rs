//! TOML parser with line context in error messages

use std::path::Path;

use anyhow::{Context, Result};

use super::schema::StagehandConfig;

/// Parse stagehand.toml
pub fn parse_stagehand_toml(path: &Path) -> Result<StagehandConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_stagehand_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse stagehand.toml content from a string
pub fn parse_stagehand_toml_str(content: &str) -> Result<StagehandConfig> {
    let config: StagehandConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
    config.validate()?;
    Ok(config)
}

fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();
    let line = error
        .span()
        .map(|span| content[..span.start.min(content.len())].lines().count().max(1));

    match line {
        Some(line) => anyhow::anyhow!(
            "TOML parsing error at line {}:\n{}\n\nError: {}",
            line,
            line_context(content, line),
            message
        ),
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

/// Two lines either side of `line`, with the offending one marked.
fn line_context(content: &str, line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line.saturating_sub(3);
    let end = (line + 2).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let num = start + i + 1;
            let marker = if num == line { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialize a configuration to a TOML string
pub fn to_toml(config: &StagehandConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration to TOML")
}
