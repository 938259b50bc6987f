//! Canonical document locations.

pub fn environment_manifest(env: &str) -> String {
    format!("environment/{env}/manifest.json")
}

pub fn deploy_manifest(env: &str) -> String {
    format!("environment/{env}/deploys/deploys.json")
}

pub fn deploy_lock(env: &str) -> String {
    format!("environment/{env}/lock.json")
}

pub fn environments_dir() -> &'static str {
    "environment"
}

pub fn deploy(env: &str, name: &str) -> String {
    format!("deploys/{env}/{name}/deploy.json")
}

pub fn deployed_contracts(env: &str, name: &str) -> String {
    format!("deploys/{env}/{name}/deployed-contracts.json")
}

pub fn mutations(env: &str, name: &str) -> String {
    format!("deploys/{env}/{name}/mutations.json")
}

/// Per-segment evidence file, e.g. `deploys/main/x/0/script.run.json`.
pub fn segment_file(env: &str, name: &str, segment: usize, file: &str) -> String {
    format!("deploys/{env}/{name}/{segment}/{file}")
}

pub fn upgrade_manifest(upgrade: &str) -> String {
    format!("upgrade/{upgrade}/manifest.json")
}

pub fn upgrades_dir() -> &'static str {
    "upgrade"
}

pub fn parameters(env: &str) -> String {
    format!("deploys/{env}/parameters.json")
}

pub fn parameters_schema(env: &str) -> String {
    format!("deploys/{env}/parameters.schema.json")
}

/// Evidence file names written by segment handlers.
pub mod evidence {
    pub const TEST_RUN: &str = "forge.test.json";
    pub const EOA_RUN: &str = "foundry.run.json";
    pub const CONFIRMED_TRANSACTIONS: &str = "transactions.json";
    pub const MULTISIG_RUN: &str = "multisig.run.json";
    pub const MULTISIG_EXECUTE: &str = "multisig.execute.json";
    pub const MULTISIG_CANCEL: &str = "multisig.cancel.json";
    pub const SCRIPT_RUN: &str = "script.run.json";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_layout() {
        assert_eq!(environment_manifest("main"), "environment/main/manifest.json");
        assert_eq!(deploy_manifest("main"), "environment/main/deploys/deploys.json");
        assert_eq!(deploy_lock("main"), "environment/main/lock.json");
        assert_eq!(deploy("main", "d1"), "deploys/main/d1/deploy.json");
        assert_eq!(
            segment_file("main", "d1", 2, evidence::SCRIPT_RUN),
            "deploys/main/d1/2/script.run.json"
        );
        assert_eq!(upgrade_manifest("v2"), "upgrade/v2/manifest.json");
        assert_eq!(parameters("main"), "deploys/main/parameters.json");
    }
}
