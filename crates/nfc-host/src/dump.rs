//! Human-readable state snapshot for bug reports.

use std::io::Write;

use nfc_core::routing::RoutingTable;
use nfc_hal::Handle;

use crate::discovery::DiscoveryState;
use crate::endpoint::arena::Endpoint;

pub(crate) fn write_snapshot(
    w: &mut dyn Write,
    initialized: bool,
    discovery: &DiscoveryState,
    routing: &RoutingTable,
    t3t_count: usize,
    endpoints: &[(Handle, Endpoint)],
) -> std::io::Result<()> {
    writeln!(w, "--- nfc-host state ---")?;
    writeln!(w, "initialized: {initialized}")?;
    writeln!(
        w,
        "discovery: enabled={} polling_active={} screen=0x{:02x} always_poll={}",
        discovery.enabled,
        discovery.polling_active(),
        discovery.screen_mask,
        discovery.always_poll,
    )?;
    match &discovery.params {
        Some(params) => writeln!(
            w,
            "  params: poll=0x{:02x} listen=0x{:02x} screen_policy=0x{:02x} p2p={}",
            params.poll_mask, params.listen_mask, params.screen_state_mask, params.enable_p2p,
        )?,
        None => writeln!(w, "  params: (none)")?,
    }
    if let Some((poll, listen)) = discovery.override_tech {
        writeln!(w, "  tech override: poll=0x{poll:02x} listen=0x{listen:02x}")?;
    }

    writeln!(w, "routing: {} committed entries, {} t3t identifiers", routing.len(), t3t_count)?;
    for entry in routing.entries() {
        writeln!(w, "  {entry}")?;
    }

    writeln!(w, "endpoints: {}", endpoints.len())?;
    for (_, endpoint) in endpoints {
        writeln!(w, "  {}", endpoint.describe())?;
    }
    Ok(())
}
