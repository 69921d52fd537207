//! Tag discovery, connection, exchange, and presence scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use nfc_core::tech::Technology;
use nfc_core::{NfcError, TransceiveStatus};
use nfc_host::{HostEvent, TagDisconnectedCallback, TagEndpoint, TagState};

async fn discovered_tag(
    state: &nfc_hal::mock::MockState,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<HostEvent>,
    uid: &[u8],
    technologies: &[Technology],
) -> Arc<TagEndpoint> {
    state.discover_tag(uid, technologies);
    match crate::next_event(rx).await {
        HostEvent::TagDiscovered(tag) => tag,
        _ => panic!("expected tag discovery"),
    }
}

#[tokio::test]
async fn full_tag_session() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04, 0xa1, 0xb2], &[
        Technology::NfcA,
        Technology::NfcB,
    ])
    .await;
    assert_eq!(&tag.uid()[..], &[0x04, 0xa1, 0xb2]);
    assert_eq!(tag.state(), TagState::Disconnected);

    // a technology the tag never reported is rejected up front
    assert!(matches!(tag.connect(Technology::NfcF).await, Err(NfcError::Connection(_))));

    tag.connect(Technology::NfcA).await?;
    assert_eq!(tag.connected_technology(), Some(Technology::NfcA));
    assert!(tag.is_present());

    state.push_response(tag.handle(), &[0x00, 0x01, 0x90, 0x00]);
    let (status, payload) = tag.transceive(&[0x30, 0x04], false).await?;
    assert_eq!(status, TransceiveStatus::Success);
    assert_eq!(&payload[..], &[0x00, 0x01, 0x90, 0x00]);

    tag.disconnect().await?;
    tag.disconnect().await?;
    assert_eq!(tag.state(), TagState::Disconnected);

    // exchanges on a torn-down link are state errors, not hardware calls
    assert!(matches!(tag.transceive(&[0x30], false).await, Err(NfcError::Connection(_))));
    Ok(())
}

#[tokio::test]
async fn empty_response_is_distinguishable_from_failure() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcA]).await;
    tag.connect(Technology::NfcA).await?;

    state.push_response(tag.handle(), &[]);
    let (status, payload) = tag.transceive(&[0x30], false).await?;
    assert_eq!(status, TransceiveStatus::Success);
    assert!(payload.is_empty());
    Ok(())
}

struct CountingCallback(AtomicUsize);

impl TagDisconnectedCallback for CountingCallback {
    fn on_tag_disconnected(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn presence_loss_fires_once_and_stop_is_final() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcA]).await;
    tag.connect(Technology::NfcA).await?;

    let callback = Arc::new(CountingCallback(AtomicUsize::new(0)));
    tag.start_presence_checking(Duration::from_millis(5), callback.clone());

    state.set_present(tag.handle(), false);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(callback.0.load(Ordering::SeqCst), 1);
    assert_eq!(tag.state(), TagState::PresenceLost);

    // stop after the fact is a harmless no-op
    tag.stop_presence_checking().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(callback.0.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn stop_presence_checking_before_loss_suppresses_callback() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcA]).await;
    tag.connect(Technology::NfcA).await?;

    let callback = Arc::new(CountingCallback(AtomicUsize::new(0)));
    tag.start_presence_checking(controller.presence_check_interval(), callback.clone());
    tag.stop_presence_checking().await;

    state.set_present(tag.handle(), false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(callback.0.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn link_loss_notification_retires_the_endpoint() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcA]).await;
    tag.connect(Technology::NfcA).await?;

    state.lose_tag(tag.handle());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(controller.tag_endpoint(tag.handle()).is_none());
    assert_eq!(tag.state(), TagState::PresenceLost);
    Ok(())
}

#[tokio::test]
async fn ndef_detect_read_write_cycle() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag =
        discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcA, Technology::Ndef]).await;
    state.set_tag_ndef(tag.handle(), b"\xd1\x01\x05T\x02enhi");
    tag.connect(Technology::NfcA).await?;

    let info = tag.check_ndef().await?.expect("ndef present");
    assert_eq!(info.current_size, 9);

    // detection alone leaves the cache empty
    assert!(tag.find_ndef().await?);
    assert!(tag.get_ndef().is_none());

    let message = tag.find_and_read_ndef().await?.expect("ndef message");
    assert_eq!(tag.get_ndef(), Some(message));

    tag.write_ndef(b"\xd1\x01\x06T\x02enbye").await?;
    Ok(())
}

#[tokio::test]
async fn format_respects_technology_capabilities() -> Result<()> {
    let (controller, state, mut rx) = crate::controller_up().await;
    controller.enable_discovery(Default::default(), false).await?;

    let tag = discovered_tag(&state, &mut rx, &[0x04], &[Technology::NfcBarcode]).await;
    tag.connect(Technology::NfcBarcode).await?;

    assert!(!tag.is_ndef_formatable());
    assert_eq!(
        tag.format_ndef(&[]).await.unwrap_err(),
        NfcError::NotFormattable(Technology::NfcBarcode)
    );
    assert!(!controller.can_make_read_only(Technology::NfcBarcode));
    Ok(())
}
