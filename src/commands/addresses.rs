use clap::Args;
use serde::Serialize;

use airlift::address::{self, AddressPolicy, Candidate, InterfaceSource, SystemInterfaces};
use airlift::defaults;

use super::CmdResult;

#[derive(Args)]
pub struct AddressesArgs {
    /// Apply subnet affinity against this host
    #[arg(long, value_name = "HOST")]
    pub target: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressesOutput {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

pub fn run(args: AddressesArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<AddressesOutput> {
    let defaults = defaults::load_defaults()?;

    let subnet = match args.target.as_deref() {
        Some(host) => Some(address::target_subnet(host)?),
        None => None,
    };
    let policy = AddressPolicy::new(defaults.discovery.excluded_interface_prefixes).with_subnet(subnet);

    let interfaces = SystemInterfaces.interfaces()?;
    let selected = policy.select(&interfaces).ok().map(|a| a.to_string());

    Ok((
        AddressesOutput {
            command: "addresses".to_string(),
            subnet: subnet.map(|s| format!("{}.{}.{}.0/24", s[0], s[1], s[2])),
            candidates: policy.evaluate(&interfaces),
            selected,
        },
        0,
    ))
}
