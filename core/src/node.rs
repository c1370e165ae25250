// Mesh node: the single owner of all messaging state
//
// Transport callbacks and timer ticks arrive as `NodeEvent`s on one channel
// and are handled one at a time, so the outbox, dedup table and beacon
// machine never see concurrent writers. UI commands call the async methods
// directly on the same task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::beacon::{
    AckLoop, AckState, BeaconError, BeaconMachine, BeaconScheduler, ReceivedBeaconTracker,
    TransmissionOutcome,
};
use crate::clock::Clock;
use crate::message::{
    beacon_ack_message, beacon_cancel_message, beacon_message, decode, encode, is_beacon,
    is_beacon_ack, is_beacon_cancel, ComposeOptions, EncodeResult, GpsFix, Severity,
};
use crate::settings::MeshSettings;
use crate::store::{
    make_key, BeaconSession, Deduplicator, DrainReport, MeshStore, MessageDirection,
    OutboxEntry, OutboxQueue, ReceivedBeacon, StoredMessage,
};
use crate::transport::{
    IncomingMessage, MeshTransport, SenderIdentity, Subscription, TransportManager,
    TransportStatus,
};
use crate::CoreError;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    MessageReceived(IncomingMessage),
    StatusChanged(TransportStatus),
    /// The beacon trigger fired and the host has a position fix
    BeaconDue(GpsFix),
    Shutdown,
}

/// Where an outbound message went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued(OutboxEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub encoded: EncodeResult,
    pub delivery: Delivery,
}

/// What happened to an incoming frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Duplicate,
    Stored {
        message: StoredMessage,
        notify: bool,
    },
    Beacon {
        beacon: ReceivedBeacon,
        notify: bool,
    },
    BeaconCancelled(Option<ReceivedBeacon>),
    /// Someone acknowledged our distress call. `session` is set when a beacon was running.
    BeaconAck {
        from: String,
        session: Option<BeaconSession>,
    },
}

pub struct MeshNode {
    store: MeshStore,
    clock: Arc<dyn Clock>,
    settings: MeshSettings,
    transport: Arc<TransportManager>,
    dedup: Deduplicator,
    outbox: OutboxQueue,
    beacon: BeaconMachine,
    received: ReceivedBeaconTracker,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
    subscriptions: Vec<Subscription>,
}

impl MeshNode {
    /// Build the node, resume any beacon left active and subscribe to the transport
    pub fn new(
        store: MeshStore,
        transport: Arc<TransportManager>,
        scheduler: Arc<dyn BeaconScheduler>,
        clock: Arc<dyn Clock>,
        settings: MeshSettings,
    ) -> Result<Self, CoreError> {
        settings.validate()?;

        let mut beacon = BeaconMachine::new(
            store.clone(),
            clock.clone(),
            scheduler,
            AckLoop::new(settings.ack_timeout()),
        )
        .with_drill_limit(settings.drill_max_transmits);
        beacon.restore()?;

        let outbox = OutboxQueue::new(store.clone(), clock.clone());
        outbox.recover_interrupted()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let on_message = {
            let tx = events_tx.clone();
            transport.on_message(Arc::new(move |msg: &IncomingMessage| {
                let _ = tx.send(NodeEvent::MessageReceived(msg.clone()));
            }))
        };
        let on_status = {
            let tx = events_tx.clone();
            transport.on_status_change(Arc::new(move |status: TransportStatus| {
                let _ = tx.send(NodeEvent::StatusChanged(status));
            }))
        };

        Ok(Self {
            dedup: Deduplicator::new(settings.dedup_window(), clock.clone()),
            outbox,
            received: ReceivedBeaconTracker::new(store.clone(), clock.clone()),
            store,
            clock,
            settings,
            transport,
            beacon,
            events_tx,
            events_rx,
            subscriptions: vec![on_message, on_status],
        })
    }

    /// Sender for host-originated events such as `BeaconDue`
    pub fn events(&self) -> mpsc::UnboundedSender<NodeEvent> {
        self.events_tx.clone()
    }

    pub fn store(&self) -> &MeshStore {
        &self.store
    }

    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    pub fn beacon(&self) -> &BeaconMachine {
        &self.beacon
    }

    pub fn outbox(&self) -> &OutboxQueue {
        &self.outbox
    }

    pub fn received_beacons(&self) -> &ReceivedBeaconTracker {
        &self.received
    }

    /// Auto-tags for a composed message, honouring the user's preferences
    pub fn compose_options(
        &self,
        pax_count: u32,
        position: Option<GpsFix>,
        note: Option<String>,
    ) -> ComposeOptions {
        ComposeOptions {
            pax_count,
            position: position.filter(|_| self.settings.auto_gps),
            timestamp: self.settings.auto_timestamp.then(|| self.clock.now_ms()),
            language: self.settings.language.clone(),
            note,
        }
    }

    // ------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------

    /// Connect the bound radio and flush anything queued while offline
    pub async fn connect(&mut self, device_id: &str) -> Result<Option<DrainReport>, CoreError> {
        self.transport.connect(device_id).await?;
        self.drain_outbox().await
    }

    pub async fn disconnect(&mut self) -> Result<(), CoreError> {
        self.transport.disconnect().await?;
        Ok(())
    }

    pub async fn drain_outbox(&self) -> Result<Option<DrainReport>, CoreError> {
        Ok(self.outbox.drain(self.transport.as_ref()).await?)
    }

    /// Put on air when connected, else queue. A radio failure also queues.
    async fn dispatch(
        &self,
        text: &str,
        severity: Option<Severity>,
        channel: Option<u32>,
    ) -> Result<Delivery, CoreError> {
        if self.transport.is_connected() {
            match self.transport.send_text(text, channel).await {
                Ok(()) => {
                    let record = StoredMessage::sent(text, channel, self.clock.now_ms());
                    self.store.insert_message(record)?;
                    return Ok(Delivery::Sent);
                }
                Err(e) => warn!("Send failed, queueing for retry: {}", e),
            }
        }
        let entry = self.outbox.enqueue(text, channel, severity)?;
        Ok(Delivery::Queued(entry))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Encode and send a message. A MAYDAY starts the ACK wait.
    ///
    /// Oversized messages are sent as-is; check `encoded.over_limit` first to refuse them.
    pub async fn send_message<S: AsRef<str>>(
        &mut self,
        severity: Severity,
        codes: &[S],
        freetext: Option<&str>,
        channel: Option<u32>,
    ) -> Result<SendOutcome, CoreError> {
        let encoded = encode(severity, codes, freetext);
        let delivery = self.dispatch(&encoded.message, Some(severity), channel).await?;
        if severity == Severity::Mayday {
            self.beacon.ack_loop().start(self.clock.now_ms());
        }
        Ok(SendOutcome { encoded, delivery })
    }

    /// Start a distress beacon and send its initial alert
    pub async fn activate_beacon(
        &mut self,
        codes: Vec<String>,
        freetext: Option<String>,
        severity: Severity,
    ) -> Result<(BeaconSession, SendOutcome), CoreError> {
        let encoded = encode(severity, &codes, freetext.as_deref());
        let is_drill = decode(&encoded.message).is_drill;

        let session = self
            .beacon
            .activate(codes, freetext, severity, is_drill)?
            .clone();
        let delivery = self.dispatch(&encoded.message, Some(severity), None).await?;
        self.beacon.ack_loop().start(self.clock.now_ms());

        Ok((session, SendOutcome { encoded, delivery }))
    }

    /// Periodic beacon transmission at the current position
    pub async fn transmit_beacon(
        &mut self,
        position: GpsFix,
    ) -> Result<TransmissionOutcome, CoreError> {
        let session = self
            .beacon
            .active_session()
            .ok_or(BeaconError::NoActiveSession)?;
        let encoded = beacon_message(
            session.severity,
            &session.original_codes,
            position,
            self.clock.now_ms(),
        );
        let severity = session.severity;

        self.dispatch(&encoded.message, Some(severity), None).await?;
        Ok(self.beacon.record_transmission(position)?)
    }

    /// Stop our beacon and tell the mesh. No-op when no beacon is running.
    pub async fn cancel_beacon(&mut self) -> Result<Option<BeaconSession>, CoreError> {
        let Some(cancelled) = self.beacon.cancel()? else {
            return Ok(None);
        };
        let encoded = beacon_cancel_message();
        self.dispatch(&encoded.message, Some(Severity::Safety), None).await?;
        Ok(Some(cancelled))
    }

    /// Reply to someone else's beacon so they can slow down
    pub async fn acknowledge_remote_beacon(
        &mut self,
        sender_node_id: &str,
    ) -> Result<Delivery, CoreError> {
        debug!("Acknowledging beacon from {}", sender_node_id);
        let encoded = beacon_ack_message();
        self.dispatch(&encoded.message, Some(Severity::Safety), None).await
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub async fn handle_incoming(&mut self, msg: IncomingMessage) -> Result<Inbound, CoreError> {
        if self.dedup.is_duplicate(&make_key(&msg.sender.node_id, &msg.text)) {
            return Ok(Inbound::Duplicate);
        }

        let parsed = decode(&msg.text);
        let sender = &msg.sender;
        let display_name = Some(sender.display_name.as_str()).filter(|n| !n.is_empty());

        if parsed.valid {
            if is_beacon_cancel(&parsed.codes) {
                let closed = self.received.process_beacon_cancel(&sender.node_id)?;
                return Ok(Inbound::BeaconCancelled(closed));
            }
            if is_beacon_ack(&parsed.codes) {
                return self.handle_beacon_ack(sender, display_name);
            }
            if is_beacon(&parsed.codes) {
                let beacon = self.received.process_incoming_beacon(
                    &sender.node_id,
                    display_name,
                    &parsed.codes.join(" "),
                    parsed.is_drill,
                    parsed.extracted.gps,
                )?;
                let notify = self.settings.should_notify(&parsed);
                return Ok(Inbound::Beacon { beacon, notify });
            }
        }

        let record = StoredMessage::from_parsed(&parsed, MessageDirection::Received, msg.timestamp)
            .with_sender(&sender.node_id, display_name)
            .with_channel(msg.channel.clone())
            .with_signal(msg.signal.map(|s| s.rssi), msg.signal.map(|s| s.snr));
        let message = self.store.insert_message(record)?;
        let notify = self.settings.should_notify(&parsed);
        Ok(Inbound::Stored { message, notify })
    }

    fn handle_beacon_ack(
        &mut self,
        sender: &SenderIdentity,
        display_name: Option<&str>,
    ) -> Result<Inbound, CoreError> {
        let session = if self.beacon.is_active() {
            Some(self.beacon.acknowledge(&sender.node_id, display_name)?.clone())
        } else {
            // A plain MAYDAY may still be waiting for its answer
            let ack = self.beacon.ack_loop();
            if ack.state() == AckState::Waiting {
                ack.acknowledge(&sender.node_id, display_name);
            }
            None
        };
        Ok(Inbound::BeaconAck {
            from: sender.node_id.clone(),
            session,
        })
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    pub async fn handle_event(&mut self, event: NodeEvent) -> Result<Option<Inbound>, CoreError> {
        match event {
            NodeEvent::MessageReceived(msg) => Ok(Some(self.handle_incoming(msg).await?)),
            NodeEvent::StatusChanged(TransportStatus::Connected) => {
                self.drain_outbox().await?;
                Ok(None)
            }
            NodeEvent::StatusChanged(status) => {
                debug!("Transport {}", status);
                Ok(None)
            }
            NodeEvent::BeaconDue(position) => {
                if self.beacon.is_active() {
                    self.transmit_beacon(position).await?;
                }
                Ok(None)
            }
            NodeEvent::Shutdown => Ok(None),
        }
    }

    pub async fn next_event(&mut self) -> Option<NodeEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued, without waiting. Returns how many ran.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(e) = self.handle_event(event).await {
                warn!("Event handling failed: {}", e);
            }
            handled += 1;
        }
        handled
    }

    /// Consume events until `Shutdown`
    pub async fn run(mut self) {
        info!("Mesh node running");
        while let Some(event) = self.next_event().await {
            if matches!(event, NodeEvent::Shutdown) {
                break;
            }
            if let Err(e) = self.handle_event(event).await {
                warn!("Event handling failed: {}", e);
            }
        }
        info!("Mesh node stopped");
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
    }
}
