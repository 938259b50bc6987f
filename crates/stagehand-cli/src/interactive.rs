//! Terminal prompts for choices the driver cannot make alone.
//!
//! Uses dialoguer for prompts and console for styling.

use std::io::{self, IsTerminal};

use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

use stagehand_core::deploy::session::SignerPrompt;

/// Whether prompting makes sense for this invocation.
pub fn can_prompt(non_interactive: bool) -> bool {
    !non_interactive && io::stdin().is_terminal() && io::stderr().is_terminal()
}

/// Ask the operator which of several equally short upgrade paths to run.
pub fn select_path(paths: &[Vec<String>]) -> Result<Option<Vec<String>>> {
    eprintln!(
        "{}",
        style(format!("  {} upgrade paths tie for shortest", paths.len())).bold()
    );
    let items: Vec<String> = paths.iter().map(|path| path.join(" -> ")).collect();
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Upgrade path")
        .items(&items)
        .default(0)
        .interact_opt()?;
    Ok(choice.map(|index| paths[index].clone()))
}

/// Signer prompt handed to the session; asked at most once per invocation.
pub fn signer_prompt() -> SignerPrompt {
    Box::new(|ids: &[&str]| {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Signer")
            .items(ids)
            .default(0)
            .interact_opt()
            .ok()
            .flatten()
    })
}
