//! `ais models` listing.

use ais_core::providers::ServiceKind;
use anyhow::Result;

/// Prints the supported services and their model catalogs.
pub fn list() -> Result<()> {
    for service in ServiceKind::ALL {
        println!("{} [{}]", service.label(), service.id());
        for model in service.models() {
            println!("  {:<32} {}", model.id, model.label);
        }
        println!();
    }
    println!("Set `service` and `model` in the config file (`ais config path`).");
    Ok(())
}
