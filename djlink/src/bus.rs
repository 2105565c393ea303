use tokio::sync::{broadcast, mpsc};

use crate::{
    message::{
        Beat, ChannelsOnAir, Device, DeviceUpdate, MasterHandoff, Message, PrecisePosition,
        SyncCommand,
    },
    DjLinkError, Result,
};

/// A device appearing on or dropping off the network.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    Found(Device),
    Lost(Device),
}

/// Tempo-master bookkeeping events, in the order they are published:
/// a master change always precedes the tempo change derived from the
/// same packet.
#[derive(Clone, Debug, PartialEq)]
pub enum MasterEvent {
    MasterChanged(Option<u8>),
    TempoChanged(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncEvent {
    pub device_num: u8,
    pub command: SyncCommand,
}

const CHANNEL_CAPACITY: usize = 64;

/// Typed fan-out to any number of subscribers. Subscribing hands back a
/// `broadcast::Receiver`; dropping it unsubscribes. Slow subscribers
/// observe `Lagged` rather than stalling the receive loops.
#[derive(Clone)]
pub struct EventBus {
    devices: broadcast::Sender<DeviceEvent>,
    updates: broadcast::Sender<DeviceUpdate>,
    beats: broadcast::Sender<Beat>,
    master_beats: broadcast::Sender<Beat>,
    master: broadcast::Sender<MasterEvent>,
    sync: broadcast::Sender<SyncEvent>,
    on_air: broadcast::Sender<ChannelsOnAir>,
    handoff: broadcast::Sender<MasterHandoff>,
    positions: broadcast::Sender<PrecisePosition>,
}

impl EventBus {
    pub(crate) fn new() -> EventBus {
        EventBus {
            devices: broadcast::channel(CHANNEL_CAPACITY).0,
            updates: broadcast::channel(CHANNEL_CAPACITY).0,
            beats: broadcast::channel(CHANNEL_CAPACITY).0,
            master_beats: broadcast::channel(CHANNEL_CAPACITY).0,
            master: broadcast::channel(CHANNEL_CAPACITY).0,
            sync: broadcast::channel(CHANNEL_CAPACITY).0,
            on_air: broadcast::channel(CHANNEL_CAPACITY).0,
            handoff: broadcast::channel(CHANNEL_CAPACITY).0,
            positions: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.devices.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.updates.subscribe()
    }

    pub fn subscribe_beats(&self) -> broadcast::Receiver<Beat> {
        self.beats.subscribe()
    }

    /// Beats coming from whichever device is currently tempo master.
    pub fn subscribe_master_beats(&self) -> broadcast::Receiver<Beat> {
        self.master_beats.subscribe()
    }

    pub fn subscribe_master(&self) -> broadcast::Receiver<MasterEvent> {
        self.master.subscribe()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    pub fn subscribe_on_air(&self) -> broadcast::Receiver<ChannelsOnAir> {
        self.on_air.subscribe()
    }

    pub fn subscribe_handoff(&self) -> broadcast::Receiver<MasterHandoff> {
        self.handoff.subscribe()
    }

    pub fn subscribe_positions(&self) -> broadcast::Receiver<PrecisePosition> {
        self.positions.subscribe()
    }

    // A send only fails when nobody is subscribed, which is fine.
    fn dispatch(&self, msg: &Message) {
        match msg {
            Message::DeviceFound(d) => {
                let _ = self.devices.send(DeviceEvent::Found(d.clone()));
            }
            Message::DeviceLost(d) => {
                let _ = self.devices.send(DeviceEvent::Lost(d.clone()));
            }
            Message::StatusUpdate(u) => {
                let _ = self.updates.send(u.clone());
            }
            Message::Beat(b) => {
                let _ = self.beats.send(b.clone());
            }
            Message::MasterBeat(b) => {
                let _ = self.master_beats.send(b.clone());
            }
            Message::PrecisePosition(p) => {
                let _ = self.positions.send(p.clone());
            }
            Message::MasterChanged(m) => {
                let _ = self.master.send(MasterEvent::MasterChanged(*m));
            }
            Message::TempoChanged(t) => {
                let _ = self.master.send(MasterEvent::TempoChanged(*t));
            }
            Message::SyncCommand {
                device_num,
                command,
            } => {
                let _ = self.sync.send(SyncEvent {
                    device_num: *device_num,
                    command: *command,
                });
            }
            Message::ChannelsOnAir(c) => {
                let _ = self.on_air.send(c.clone());
            }
            Message::MasterHandoff(h) => {
                let _ = self.handoff.send(h.clone());
            }
            Message::Stopped => (),
        }
    }
}

/// Every event goes both to the typed bus channels and to the combined
/// message stream consumed through `DjLink::next()`. The stream closing
/// is the termination signal for the tasks holding a `Publisher`.
#[derive(Clone)]
pub(crate) struct Publisher {
    msg_tx: mpsc::Sender<Message>,
    bus: EventBus,
}

impl Publisher {
    pub(crate) fn new(msg_tx: mpsc::Sender<Message>, bus: EventBus) -> Publisher {
        Publisher { msg_tx, bus }
    }

    pub(crate) async fn publish(&self, msg: Message) -> Result<()> {
        self.bus.dispatch(&msg);
        // The stream closing means the handle was dropped.
        self.msg_tx
            .send(msg)
            .await
            .map_err(|_| DjLinkError::Terminating)
    }

    /// Best-effort delivery of the lifecycle stop notice from a dying
    /// receive loop.
    pub(crate) fn publish_stopped(&self) {
        self.bus.dispatch(&Message::Stopped);
        let _ = self.msg_tx.try_send(Message::Stopped);
    }

    pub(crate) async fn closed(&self) {
        self.msg_tx.closed().await
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.msg_tx.is_closed()
    }
}
