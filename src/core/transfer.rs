//! Push relay names to the relay, then confirm each one arrived.

use crate::error::{Error, RelayDetails, Result};
use crate::relay::Relay;
use crate::tagger::RelayName;

/// Push sequentially, stopping at the first failure. Each confirmed push is
/// recorded in `pushed`.
pub fn push_all(relay: &dyn Relay, names: &[RelayName], pushed: &mut Vec<RelayName>) -> Result<()> {
    for (i, name) in names.iter().enumerate() {
        log_debug!("push", "[{}/{}] {}", i + 1, names.len(), name);
        relay.push(name)?;
        pushed.push(name.clone());
    }
    Ok(())
}

/// One listing query per name; an absent repository aborts the run.
///
/// Single attempt. A missing artifact is treated as a failed push, not as a
/// replication delay.
pub fn verify_all(relay: &dyn Relay, names: &[RelayName], verified: &mut Vec<RelayName>) -> Result<()> {
    for name in names {
        if !relay.has_repository(name)? {
            return Err(Error::verify_artifact_missing(RelayDetails {
                endpoint: name.registry(),
                relay_name: Some(name.to_string()),
                status: Some(404),
                error: None,
            }));
        }
        log_debug!("verify", "{} present", name);
        verified.push(name.clone());
    }
    Ok(())
}
