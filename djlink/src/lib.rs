use std::{
    collections::HashSet,
    net::Ipv4Addr,
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

mod bus;
pub mod message;
mod net;
mod proto;
mod registry;
mod tasks;
pub mod util;

use bus::Publisher;
use registry::DeviceRegistry;
use tasks::{
    beat::BeatTask,
    membership::{JoinState, MembershipTask},
    status::{MasterState, StatusTask},
};

pub use bus::{DeviceEvent, EventBus, MasterEvent, SyncEvent};
pub use message::{Device, DeviceKind, DeviceUpdate, Message};

#[derive(Error, Debug)]
pub enum DjLinkError {
    #[error("terminating")]
    Terminating,

    #[error("truncated packet ({len} bytes)")]
    TruncatedPacket { len: usize },

    #[error("packet magic mismatch")]
    BadMagic,

    #[error("unrecognized packet type 0x{packet_type:02x} on port {port}")]
    UnknownPacket { port: u16, packet_type: u8 },

    #[error("packet received on unexpected port {port}")]
    UnknownPort { port: u16 },

    #[error("bad length {len} for packet type 0x{packet_type:02x} on port {port}")]
    BadLength {
        port: u16,
        packet_type: u8,
        len: usize,
    },

    #[error("{error_kind} error at 0x{pos:x} parsing packet:\n{dump}")]
    ParseError {
        error_kind: String,
        pos: usize,
        dump: String,
    },

    #[error("no interface is on the subnet of {peer}")]
    NoMatchingInterface { peer: Ipv4Addr },

    #[error("every candidate device number is taken")]
    NoFreeDeviceNumber,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to join: {reason}")]
    JoinFailed { reason: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DjLinkError>;

#[derive(Debug, Clone)]
pub struct Config {
    /// Name we announce ourselves under, at most 20 ASCII bytes.
    pub name: String,
    /// Fixed device number to claim; 0 self-assigns one.
    pub device_number: u8,
    /// Whether to pose as a player or as a rekordbox-style peer.
    pub kind: DeviceKind,
    /// Self-assign from 1..=4 (the channels real players use) instead
    /// of the out-of-the-way 7..=15 block.
    pub use_standard_player_number: bool,
    /// Keep-alive cadence while joined.
    pub announce_interval_ms: u64,
    /// Smallest master-tempo movement worth reporting, in BPM.
    pub tempo_epsilon: f64,
    /// Pin the network interface by name instead of matching the
    /// subnet of the first device heard.
    pub interface_name: Option<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            name: "djlink".to_string(),
            device_number: 0,
            kind: DeviceKind::Cdj,
            use_standard_player_number: false,
            announce_interval_ms: 1500,
            tempo_epsilon: 0.0001,
            interface_name: None,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 20 || !self.name.is_ascii() {
            return Err(DjLinkError::InvalidConfig(
                "device name must be 1 to 20 ASCII bytes".to_string(),
            ));
        }
        if self.device_number > 0x3f {
            return Err(DjLinkError::InvalidConfig(
                "device number must be 0 (auto) or 1 to 0x3f".to_string(),
            ));
        }
        if !(200..=2000).contains(&self.announce_interval_ms) {
            return Err(DjLinkError::InvalidConfig(
                "announce interval must be 200 to 2000 ms".to_string(),
            ));
        }
        if !(self.tempo_epsilon > 0.0) {
            return Err(DjLinkError::InvalidConfig(
                "tempo epsilon must be positive".to_string(),
            ));
        }
        match self.kind {
            DeviceKind::Cdj | DeviceKind::Rekordbox => Ok(()),
            _ => Err(DjLinkError::InvalidConfig(
                "can only join as a player or a rekordbox-style peer".to_string(),
            )),
        }
    }
}

/// Source addresses whose datagrams are dropped before parsing, so our
/// own broadcasts do not come back to us as phantom peers.
#[derive(Clone)]
pub(crate) struct IgnoreList(Arc<Mutex<HashSet<Ipv4Addr>>>);

impl IgnoreList {
    fn new() -> IgnoreList {
        IgnoreList(Arc::new(Mutex::new(HashSet::new())))
    }

    pub(crate) fn add(&self, addr: Ipv4Addr) {
        self.0.lock().unwrap().insert(addr);
    }

    pub(crate) fn remove(&self, addr: Ipv4Addr) {
        self.0.lock().unwrap().remove(&addr);
    }

    pub(crate) fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.lock().unwrap().contains(&addr)
    }
}

/// A joined view of the network. Dropping the handle (or calling
/// [`terminate`](DjLink::terminate)) stops announcing and shuts the
/// receive loops down.
pub struct DjLink {
    child_tasks: Vec<JoinHandle<()>>,
    msg_rx: mpsc::Receiver<Message>,
    bus: EventBus,
    registry: Arc<DeviceRegistry>,
    master: Arc<Mutex<MasterState>>,
    ignore: IgnoreList,
    device_number: u8,
}

impl DjLink {
    /// Binds the three well-known ports, joins the network, and
    /// resolves once the device-number negotiation settled. Fails when
    /// a port cannot be bound, no interface matches, or every
    /// candidate number is defended.
    pub async fn join(config: Config) -> Result<DjLink> {
        config.validate()?;

        let (msg_tx, msg_rx) = mpsc::channel(256);
        let (joined_tx, mut joined_rx) = watch::channel(JoinState::Pending);
        let (beat_tx, beat_rx) = mpsc::channel(64);

        let bus = EventBus::new();
        let publisher = Publisher::new(msg_tx, bus.clone());
        let registry = Arc::new(DeviceRegistry::new());
        let ignore = IgnoreList::new();
        let master = Arc::new(Mutex::new(MasterState::default()));

        let membership = MembershipTask::new(
            &config,
            joined_tx,
            publisher.clone(),
            registry.clone(),
            ignore.clone(),
        )
        .await?;
        let status = StatusTask::new(
            &config,
            publisher.clone(),
            ignore.clone(),
            beat_rx,
            master.clone(),
        )
        .await?;
        let beat = BeatTask::new(publisher, ignore.clone(), beat_tx).await?;

        let status_handle = tokio::spawn(status.run());
        let beat_handle = tokio::spawn(beat.run());

        // Membership task needs to be run last so that other tasks
        // don't miss membership events.
        let membership_handle = tokio::spawn(membership.run());

        let joined = loop {
            let state = joined_rx.borrow().clone();
            match state {
                JoinState::Joined(device_number) => break Ok(device_number),
                JoinState::Failed(reason) => break Err(reason),
                JoinState::Pending => {
                    if joined_rx.changed().await.is_err() {
                        break Err("membership task terminated".to_string());
                    }
                }
            }
        };

        let mut link = DjLink {
            child_tasks: vec![membership_handle, status_handle, beat_handle],
            msg_rx,
            bus,
            registry,
            master,
            ignore,
            device_number: 0,
        };

        match joined {
            Ok(device_number) => {
                link.device_number = device_number;
                Ok(link)
            }
            Err(reason) => {
                link.terminate().await;
                Err(DjLinkError::JoinFailed { reason })
            }
        }
    }

    /// The next event from the network, in arrival order.
    pub async fn next(&mut self) -> Result<Message> {
        self.msg_rx
            .recv()
            .await
            .ok_or(anyhow!("receive tasks have terminated").into())
    }

    /// Typed multi-subscriber access to the same event streams.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The device number we answer to.
    pub fn device_number(&self) -> u8 {
        self.device_number
    }

    /// Copy of the devices currently visible on the network.
    pub fn snapshot(&self) -> Vec<Device> {
        self.registry.snapshot()
    }

    /// Device number of the current tempo master, if there is one.
    pub fn tempo_master(&self) -> Option<u8> {
        self.master.lock().unwrap().master
    }

    /// Effective tempo of the current master in BPM.
    pub fn master_tempo(&self) -> Option<f64> {
        self.master.lock().unwrap().tempo
    }

    /// Drops all datagrams from `addr` on every port.
    pub fn add_ignored_address(&self, addr: Ipv4Addr) {
        self.ignore.add(addr);
    }

    pub fn remove_ignored_address(&self, addr: Ipv4Addr) {
        self.ignore.remove(addr);
    }

    /// Stops announcing, closes the sockets, and waits for the receive
    /// loops to wind down.
    pub async fn terminate(self) {
        // notify children that we are terminating.
        drop(self.msg_rx);
        for t in self.child_tasks {
            let _ = tokio::join!(t);
        }
    }
}
