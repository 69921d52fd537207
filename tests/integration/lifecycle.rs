//! Controller lifecycle ordering and idempotence.

use anyhow::Result;

use nfc_core::config::HostConfig;
use nfc_core::tech::Technology;
use nfc_core::NfcError;
use nfc_hal::mock::MockController;
use nfc_host::NfcController;

#[tokio::test]
async fn initialize_deinitialize_round_trip() -> Result<()> {
    let (controller, _state, _rx) = crate::controller_up().await;

    // repeated initialize is a no-op success
    controller.initialize().await?;
    assert!(controller.is_initialized());
    assert_eq!(controller.get_aid_table_size()?, 50);

    controller.deinitialize().await?;
    assert!(!controller.is_initialized());
    // repeated deinitialize is a no-op success
    controller.deinitialize().await?;

    // capabilities are gone until the next initialize
    assert!(matches!(controller.get_aid_table_size(), Err(NfcError::NotInitialized)));

    controller.initialize().await?;
    assert_eq!(controller.get_aid_table_size()?, 50);
    Ok(())
}

#[tokio::test]
async fn deinitialize_without_initialize_is_no_op() -> Result<()> {
    crate::init_tracing();
    let (hal, events, _state) = MockController::spawn();
    let controller = NfcController::new(hal, events, HostConfig::default());

    controller.deinitialize().await?;
    assert!(!controller.is_initialized());
    Ok(())
}

#[tokio::test]
async fn firmware_check_is_rejected_while_initialized() -> Result<()> {
    crate::init_tracing();
    let (hal, events, _state) = MockController::spawn();
    let controller = NfcController::new(hal, events, HostConfig::default());

    assert!(controller.check_firmware().await?);

    controller.initialize().await?;
    assert!(matches!(controller.check_firmware().await, Err(NfcError::Lifecycle(_))));

    controller.deinitialize().await?;
    assert!(controller.check_firmware().await?);
    Ok(())
}

#[tokio::test]
async fn operations_require_initialization() {
    crate::init_tracing();
    let (hal, events, _state) = MockController::spawn();
    let controller = NfcController::new(hal, events, HostConfig::default());

    assert!(matches!(
        controller.enable_discovery(Default::default(), false).await,
        Err(NfcError::NotInitialized)
    ));
    assert!(matches!(
        controller.route_aid(&[0xa0], 1, 0, 1),
        Err(NfcError::NotInitialized)
    ));
    assert!(matches!(controller.commit_routing().await, Err(NfcError::NotInitialized)));
    assert!(matches!(
        controller.send_raw_vendor_cmd(0x01, 0x0f, 0x00, &[]).await,
        Err(NfcError::NotInitialized)
    ));
}

#[tokio::test]
async fn deinitialize_disconnects_live_endpoints() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let handle = state.discover_tag(&[0x04, 0x11], &[Technology::NfcA]);
    let tag = match crate::next_event(&mut rx).await {
        nfc_host::HostEvent::TagDiscovered(tag) => tag,
        _ => panic!("expected tag discovery"),
    };
    tag.connect(Technology::NfcA).await?;

    controller.deinitialize().await?;
    assert!(controller.tag_endpoint(handle).is_none());
    assert_eq!(tag.state(), nfc_host::TagState::Disconnected);
    assert!(!state.is_discovery_running());
    Ok(())
}

#[tokio::test]
async fn dump_reports_controller_state() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;
    controller.route_aid(&[0xa0, 0x00, 0x00, 0x03], 1, 0, 1)?;
    controller.commit_routing().await?;

    state.discover_tag(&[0x04, 0x22], &[Technology::NfcA, Technology::IsoDep]);
    let _ = crate::next_event(&mut rx).await;

    let mut out = Vec::new();
    controller.dump(&mut out)?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("initialized: true"));
    assert!(text.contains("discovery: enabled=true"));
    assert!(text.contains("aid=A0000003"));
    assert!(text.contains("tag handle="));
    Ok(())
}
