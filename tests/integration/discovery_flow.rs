//! Discovery programming, polling policy, and event delivery scenarios.

use std::time::Duration;

use anyhow::Result;

use nfc_core::discovery::{screen_state, DiscoveryParameters};
use nfc_core::tech::{tech_mask, Technology};
use nfc_hal::HalEvent;
use nfc_host::HostEvent;

#[tokio::test]
async fn identical_parameters_no_op_unless_restarted() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;
    let params = DiscoveryParameters::default();

    controller.enable_discovery(params.clone(), false).await?;
    controller.enable_discovery(params.clone(), false).await?;
    assert_eq!(state.discovery_starts(), 1);
    assert_eq!(state.discovery_stops(), 0);

    controller.enable_discovery(params, true).await?;
    assert_eq!(state.discovery_starts(), 2);
    assert_eq!(state.discovery_stops(), 1);
    Ok(())
}

#[tokio::test]
async fn tech_override_round_trip() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;
    let params = DiscoveryParameters::default().with_poll_mask(tech_mask::A | tech_mask::B);
    controller.enable_discovery(params, false).await?;

    controller.set_discovery_tech(tech_mask::F, tech_mask::NONE).await?;
    assert_eq!(state.discovery_starts(), 2);

    controller.reset_discovery_tech().await?;
    assert_eq!(state.discovery_starts(), 3);

    // a reset without a pending override changes nothing
    controller.reset_discovery_tech().await?;
    assert_eq!(state.discovery_starts(), 3);
    Ok(())
}

#[tokio::test]
async fn screen_off_reprograms_discovery_once() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;
    controller
        .enable_discovery(
            DiscoveryParameters::default().with_screen_state(screen_state::ON_UNLOCKED),
            false,
        )
        .await?;
    assert_eq!(state.discovery_starts(), 1);

    // gate flips: polling suppressed, one reprogram cycle
    controller.set_screen_state(screen_state::OFF_LOCKED, false).await?;
    assert_eq!(state.discovery_starts(), 2);

    // same screen state again does not flip the gate
    controller.set_screen_state(screen_state::OFF_LOCKED, false).await?;
    assert_eq!(state.discovery_starts(), 2);

    // back on, polling resumes
    controller.set_screen_state(screen_state::ON_UNLOCKED, false).await?;
    assert_eq!(state.discovery_starts(), 3);
    Ok(())
}

#[tokio::test]
async fn connected_tag_is_not_rediscovered() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let handle = state.discover_tag(&[0x04, 0x01], &[Technology::NfcA]);
    let tag = match crate::next_event(&mut rx).await {
        HostEvent::TagDiscovered(tag) => tag,
        _ => panic!("expected tag discovery"),
    };
    tag.connect(Technology::NfcA).await?;

    state.rediscover_tag(handle);
    assert!(crate::no_event_within(&mut rx, Duration::from_millis(50)).await);

    // after disconnect the same handle is reportable again
    tag.disconnect().await?;
    state.rediscover_tag(handle);
    assert!(matches!(crate::next_event(&mut rx).await, HostEvent::TagDiscovered(_)));
    Ok(())
}

#[tokio::test]
async fn field_events_arrive_in_hardware_order() -> Result<()> {
    let (_controller, state, mut rx) = crate::controller_up().await;

    state.inject(HalEvent::FieldActivated);
    state.inject(HalEvent::FieldDeactivated);
    state.inject(HalEvent::FieldActivated);

    assert!(matches!(crate::next_event(&mut rx).await, HostEvent::FieldActivated));
    assert!(matches!(crate::next_event(&mut rx).await, HostEvent::FieldDeactivated));
    assert!(matches!(crate::next_event(&mut rx).await, HostEvent::FieldActivated));
    Ok(())
}

#[tokio::test]
async fn vendor_notifications_are_opt_in() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;

    state.inject(HalEvent::Vendor { gid: 0x0f, oid: 0x02, payload: Default::default() });
    assert!(crate::no_event_within(&mut rx, Duration::from_millis(50)).await);

    controller.enable_vendor_nci_notifications(true);
    state.inject(HalEvent::Vendor { gid: 0x0f, oid: 0x02, payload: Default::default() });
    assert!(matches!(
        crate::next_event(&mut rx).await,
        HostEvent::Vendor { gid: 0x0f, oid: 0x02, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn hce_session_events_flow_through() -> Result<()> {
    let (_controller, state, mut rx) = crate::controller_up().await;

    state.inject(HalEvent::HceActivated { technology: Technology::IsoDep });
    state.inject(HalEvent::HceData {
        technology: Technology::IsoDep,
        data: bytes::Bytes::from_static(&[0x00, 0xa4, 0x04, 0x00]),
    });
    state.inject(HalEvent::HceDeactivated { technology: Technology::IsoDep });

    assert!(matches!(
        crate::next_event(&mut rx).await,
        HostEvent::HostCardEmulationActivated { technology: Technology::IsoDep }
    ));
    match crate::next_event(&mut rx).await {
        HostEvent::HostCardEmulationData { technology, data } => {
            assert_eq!(technology, Technology::IsoDep);
            assert_eq!(&data[..], &[0x00, 0xa4, 0x04, 0x00]);
        }
        _ => panic!("expected HCE data"),
    }
    assert!(matches!(
        crate::next_event(&mut rx).await,
        HostEvent::HostCardEmulationDeactivated { technology: Technology::IsoDep }
    ));
    Ok(())
}
