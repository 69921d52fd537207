//! Routing table staging, commit, rollback, and T3T scenarios driven
//! through the controller facade.

use anyhow::Result;

use nfc_core::routing::{
    RouteSelector, CLEAR_AID_ENTRIES, CLEAR_ALL, CLEAR_PROTOCOL_ENTRIES, CLEAR_TECHNOLOGY_ENTRIES,
};
use nfc_core::NfcError;

#[tokio::test]
async fn route_replacement_commits_a_single_entry() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    let aid = [0xa0, 0x00, 0x00, 0x03, 0x96];
    controller.route_aid(&aid, 1, 0, 0x01)?;
    controller.route_aid(&aid, 2, 0, 0x01)?;
    controller.commit_routing().await?;

    let committed = state.committed_routes();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].route, 2);

    let table = controller.get_routing_table()?;
    assert_eq!(table.aid_entry(&aid).expect("aid routed").route, 2);
    Ok(())
}

#[tokio::test]
async fn unroute_before_commit_never_reaches_hardware() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    controller.route_aid(&[0xa0, 0x01], 1, 0, 0x01)?;
    controller.unroute_aid(&[0xa0, 0x01])?;
    controller.commit_routing().await?;

    assert!(state.committed_routes().is_empty());
    assert!(controller.get_routing_table()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_commit_rolls_back_to_last_committed() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    controller.route_aid(&[0xa0, 0x01], 1, 0, 0x01)?;
    controller.commit_routing().await?;
    let baseline = controller.get_routing_table()?;

    state.set_fail_commit(true);
    controller.route_aid(&[0xb0, 0x02], 2, 0, 0x01)?;
    assert!(matches!(controller.commit_routing().await, Err(NfcError::Commit)));

    // observable table is still the last committed one
    assert_eq!(controller.get_routing_table()?, baseline);

    // and a retry after the fault clears commits exactly the baseline,
    // not the rolled-back edit
    state.set_fail_commit(false);
    controller.commit_routing().await?;
    assert_eq!(state.committed_routes().len(), 1);
    assert!(controller.get_routing_table()?.aid_entry(&[0xb0, 0x02]).is_none());
    Ok(())
}

#[tokio::test]
async fn aid_capacity_is_enforced_before_commit() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;
    // shrink the table and re-initialize so the bound is picked up
    controller.deinitialize().await?;
    state.set_aid_table_size(2);
    controller.initialize().await?;

    controller.route_aid(&[0xa0, 0x01], 1, 0, 0x01)?;
    controller.route_aid(&[0xa0, 0x02], 1, 0, 0x01)?;
    assert!(matches!(
        controller.route_aid(&[0xa0, 0x03], 1, 0, 0x01),
        Err(NfcError::Capacity { used: 2, max: 2 })
    ));

    // replacement of an existing AID stays legal at the bound
    controller.route_aid(&[0xa0, 0x02], 3, 0, 0x01)?;
    Ok(())
}

#[tokio::test]
async fn selective_and_full_clears() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    controller.route_aid(&[0xa0, 0x01], 1, 0, 0x01)?;
    controller.commit_routing().await?;

    controller.clear_routing_entry(CLEAR_AID_ENTRIES)?;
    controller.commit_routing().await?;
    assert!(state.committed_routes().is_empty());

    controller.route_aid(&[0xa0, 0x02], 1, 0, 0x01)?;
    controller.clear_routing_entry(CLEAR_ALL)?;
    controller.commit_routing().await?;
    assert!(controller.get_routing_table()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn protocol_and_technology_default_routes_commit() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    controller.set_iso_dep_protocol_route(2)?;
    controller.set_technology_ab_route(3)?;
    controller.commit_routing().await?;

    let committed = state.committed_routes();
    let protocol = committed
        .iter()
        .find(|entry| entry.selector == RouteSelector::IsoDepProtocol)
        .expect("protocol default routed");
    assert_eq!(protocol.route, 2);
    let technology = committed
        .iter()
        .find(|entry| entry.selector == RouteSelector::TechnologyAb)
        .expect("technology default routed");
    assert_eq!(technology.route, 3);

    // reprogramming a default replaces it rather than stacking entries
    controller.set_iso_dep_protocol_route(1)?;
    controller.commit_routing().await?;
    let committed = state.committed_routes();
    assert_eq!(committed.len(), 2);
    let protocol = committed
        .iter()
        .find(|entry| entry.selector == RouteSelector::IsoDepProtocol)
        .expect("protocol default still routed");
    assert_eq!(protocol.route, 1);

    controller.clear_routing_entry(CLEAR_PROTOCOL_ENTRIES | CLEAR_TECHNOLOGY_ENTRIES)?;
    controller.commit_routing().await?;
    assert!(state.committed_routes().is_empty());
    Ok(())
}

#[tokio::test]
async fn t3t_identifier_lifecycle() -> Result<()> {
    let (controller, state, _rx) = crate::controller_up().await;

    let id = [0x12, 0xfc, 1, 2, 3, 4, 5, 6, 7, 8];
    controller.register_t3t_identifier(&id).await?;
    controller.register_t3t_identifier(&id).await?; // duplicate, absorbed
    assert_eq!(controller.t3t_identifier_count(), 1);
    assert_eq!(state.registered_t3t().len(), 1);

    controller.deregister_t3t_identifier(&id).await?;
    assert_eq!(controller.t3t_identifier_count(), 0);

    controller.register_t3t_identifier(&id).await?;
    controller.clear_t3t_identifiers_cache().await?;
    assert_eq!(controller.t3t_identifier_count(), 0);
    assert!(state.registered_t3t().is_empty());
    Ok(())
}
