use std::sync::Arc;
use std::time::Duration;

use mecp_core::beacon::{AckState, IntervalTrigger, ManualTrigger};
use mecp_core::store::BeaconStatus;
use mecp_core::transport::{
    IncomingMessage, LoopbackTransport, MeshPlatform, SenderIdentity, TransportManager,
};
use mecp_core::{
    decode, GpsFix, Inbound, ManualClock, MeshNode, MeshSettings, MeshStore, NodeEvent, Severity,
};

const START_MS: u64 = 1_709_303_400_000; // 14:30 UTC

fn rescue_ack() -> IncomingMessage {
    IncomingMessage {
        text: "MECP/2/B02 R01".to_string(),
        sender: SenderIdentity::new("!hzs1", "HZS Tatry", MeshPlatform::Meshtastic),
        channel: None,
        timestamp: START_MS,
        signal: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_beacon_ticks_until_acknowledged_then_cancelled() -> anyhow::Result<()> {
    let radio = LoopbackTransport::shared();
    let manager = Arc::new(TransportManager::new());
    manager.set_adapter(radio.clone());
    let (trigger, mut ticks) = IntervalTrigger::channel();
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut node = MeshNode::new(
        MeshStore::in_memory(),
        manager,
        Arc::new(trigger),
        clock.clone(),
        MeshSettings::default(),
    )?;
    node.connect("loop-0").await?;

    let (session, _) = node
        .activate_beacon(vec!["M01".into(), "T01".into()], Some("2pax".into()), Severity::Mayday)
        .await?;
    assert_eq!(session.interval_minutes, 5);

    // Two ticks at the five minute cadence
    let here = GpsFix::new(49.1794, 20.0881);
    for _ in 0..2 {
        let tick = ticks.recv().await.expect("trigger alive");
        assert_eq!(tick.interval, Duration::from_secs(300));
        clock.advance(tick.interval);
        node.handle_event(NodeEvent::BeaconDue(here)).await?;
    }

    let inbound = node.handle_incoming(rescue_ack()).await?;
    let Inbound::BeaconAck { from, session: Some(acked) } = inbound else {
        panic!("expected an acknowledgement of the running beacon");
    };
    assert_eq!(from, "!hzs1");
    assert_eq!(acked.interval_minutes, 15);
    assert_eq!(acked.ack_display_name.as_deref(), Some("HZS Tatry"));
    assert_eq!(node.beacon().ack_loop().state(), AckState::Acknowledged);

    // Trigger was re-armed at the slower cadence
    let tick = ticks.recv().await.expect("trigger alive");
    assert_eq!(tick.interval, Duration::from_secs(900));

    let cancelled = node.cancel_beacon().await?.expect("beacon was running");
    assert_eq!(cancelled.status, BeaconStatus::Completed);
    assert_eq!(cancelled.transmit_count, 2);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(ticks.try_recv().is_err());

    let sent = radio.sent_texts();
    assert_eq!(sent.first().map(String::as_str), Some("MECP/0/M01 T01 2pax"));
    assert_eq!(sent.last().map(String::as_str), Some("MECP/2/B03"));
    let beacon = decode(&sent[1]);
    assert_eq!(beacon.codes, vec!["B01", "M01", "T01"]);
    assert_eq!(beacon.extracted.gps, Some(here));
    assert_eq!(beacon.extracted.timestamp.as_deref(), Some("1435"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_beacon_expires_ack_wait() -> anyhow::Result<()> {
    let manager = Arc::new(TransportManager::new());
    let settings = MeshSettings {
        ack_timeout_secs: 120,
        ..Default::default()
    };
    let mut node = MeshNode::new(
        MeshStore::in_memory(),
        manager,
        Arc::new(ManualTrigger::new()),
        Arc::new(ManualClock::new(START_MS)),
        settings,
    )?;

    node.activate_beacon(vec!["M01".into()], None, Severity::Mayday).await?;
    assert_eq!(node.beacon().ack_loop().state(), AckState::Waiting);

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(node.beacon().ack_loop().state(), AckState::Expired);
    // Expiry does not stop the beacon itself
    assert!(node.beacon().is_active());
    Ok(())
}

#[tokio::test]
async fn test_drill_beacon_stops_itself() -> anyhow::Result<()> {
    let trigger = Arc::new(ManualTrigger::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut node = MeshNode::new(
        MeshStore::in_memory(),
        Arc::new(TransportManager::new()),
        trigger.clone(),
        clock.clone(),
        MeshSettings::default(),
    )?;

    let (session, _) = node
        .activate_beacon(vec!["D01".into(), "M09".into()], None, Severity::Mayday)
        .await?;
    assert!(session.is_drill);
    assert_eq!(session.max_transmits, Some(3));

    let here = GpsFix::new(48.0, 19.0);
    let mut last = None;
    for _ in 0..3 {
        clock.advance(Duration::from_secs(300));
        last = Some(node.transmit_beacon(here).await?);
    }

    let last = last.expect("three transmissions");
    assert!(last.completed);
    assert!(!node.beacon().is_active());
    assert_eq!(trigger.interval(), None);
    assert_eq!(node.beacon().ack_loop().state(), AckState::Idle);

    // Further ticks are ignored once the drill is over
    assert_eq!(node.handle_event(NodeEvent::BeaconDue(here)).await?, None);
    assert_eq!(node.outbox().entries()?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_remote_beacon_tracking_and_reply() -> anyhow::Result<()> {
    let radio = LoopbackTransport::shared();
    let manager = Arc::new(TransportManager::new());
    manager.set_adapter(radio.clone());
    let mut node = MeshNode::new(
        MeshStore::in_memory(),
        manager,
        Arc::new(ManualTrigger::new()),
        Arc::new(ManualClock::new(START_MS)),
        MeshSettings::default(),
    )?;
    node.connect("loop-0").await?;

    let lost_hiker = SenderIdentity::new("!f00d", "Jana", MeshPlatform::MeshCore);
    for (i, text) in [
        "MECP/0/B01 M01 49.17940,20.08810 @1430",
        "MECP/0/B01 M01 49.18000,20.08900 @1435",
    ]
    .into_iter()
    .enumerate()
    {
        let inbound = node
            .handle_incoming(IncomingMessage {
                text: text.to_string(),
                sender: lost_hiker.clone(),
                channel: None,
                timestamp: START_MS + i as u64 * 300_000,
                signal: None,
            })
            .await?;
        assert!(matches!(inbound, Inbound::Beacon { notify: true, .. }));
    }

    let active = node.received_beacons().active_beacons()?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].sender_display_name.as_deref(), Some("Jana"));
    assert_eq!(node.received_beacons().positions(active[0].id)?.len(), 2);

    node.acknowledge_remote_beacon("!f00d").await?;
    assert_eq!(radio.sent_texts(), vec!["MECP/2/B02 R01"]);
    Ok(())
}
