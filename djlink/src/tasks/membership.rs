use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::{
    net::UdpSocket,
    sync::watch,
    time::{self, Instant},
};

use crate::{
    bus::Publisher,
    message::{Device, DeviceKind, Message},
    net::Interface,
    proto,
    registry::DeviceRegistry,
    tasks::{log_packet_error, BadPacketKey},
    util::NoteOnce,
    Config, DjLinkError, IgnoreList, Result,
};

/// How long to watch announcements before self-assigning a number.
pub(crate) const SELF_ASSIGNMENT_WATCH_PERIOD: Duration = Duration::from_secs(4);

/// Gap between packets within a hello or claim burst.
const CLAIM_STEP: Duration = Duration::from_millis(300);

const PROTO_VER: u8 = 2;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum JoinState {
    Pending,
    Joined(u8),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClaimPhase {
    Idle,
    Hello,
    Stage1,
    Stage2,
    AwaitMixer,
    Stage3,
    Active,
    Failed,
}

/// What an incoming negotiation packet means for our claim.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ClaimSignal {
    /// A device defended the number we are claiming.
    Rejected,
    /// A mixer wants to pick our number itself.
    WillAssign,
    /// The number the mixer picked.
    Assigned(u8),
    /// The mixer considers the assignment settled.
    Finished,
    /// Someone is moving in on the number we hold.
    Defend,
}

/// The device-number negotiation state machine, separated from the
/// socket loop so the transitions can be exercised directly.
pub(crate) struct ClaimEngine {
    kind: DeviceKind,
    configured: u8,
    use_standard_player_number: bool,
    phase: ClaimPhase,
    device_num: u8,
    remaining: Vec<u8>,
}

impl ClaimEngine {
    pub(crate) fn new(config: &Config) -> ClaimEngine {
        ClaimEngine {
            kind: config.kind,
            configured: config.device_number,
            use_standard_player_number: config.use_standard_player_number,
            phase: ClaimPhase::Idle,
            device_num: 0,
            remaining: Vec::new(),
        }
    }

    // Players normally self-assign from the range real hardware leaves
    // alone; rekordbox-style peers have their own block.
    fn candidate_pool(&self) -> Vec<u8> {
        if self.configured != 0 {
            return vec![self.configured];
        }
        match self.kind {
            DeviceKind::Rekordbox => (0x13..=0x27).collect(),
            _ => {
                if self.use_standard_player_number {
                    (1..=4).collect()
                } else {
                    (7..=15).collect()
                }
            }
        }
    }

    pub(crate) fn begin_hello(&mut self) {
        self.phase = ClaimPhase::Hello;
        self.remaining = self.candidate_pool();
    }

    /// Moves to stage 1 with the next candidate the registry does not
    /// already show as taken.
    pub(crate) fn select_candidate(&mut self, registry: &DeviceRegistry) -> Result<u8> {
        while !self.remaining.is_empty() {
            let candidate = self.remaining.remove(0);
            if registry.contains(candidate) {
                debug!(target: "djlink", "device number {} is taken, skipping", candidate);
                continue;
            }
            self.device_num = candidate;
            self.phase = ClaimPhase::Stage1;
            return Ok(candidate);
        }
        self.phase = ClaimPhase::Failed;
        Err(DjLinkError::NoFreeDeviceNumber)
    }

    pub(crate) fn enter_stage2(&mut self) {
        self.phase = ClaimPhase::Stage2;
    }

    pub(crate) fn enter_stage3(&mut self) {
        self.phase = ClaimPhase::Stage3;
    }

    pub(crate) fn enter_await_mixer(&mut self) {
        self.phase = ClaimPhase::AwaitMixer;
    }

    /// Takes the number a mixer picked for us; stage 3 confirms it.
    pub(crate) fn adopt(&mut self, device_num: u8) {
        self.device_num = device_num;
        self.phase = ClaimPhase::Stage3;
    }

    pub(crate) fn activate(&mut self) {
        self.phase = ClaimPhase::Active;
    }

    pub(crate) fn reset(&mut self) {
        self.phase = ClaimPhase::Idle;
        self.device_num = 0;
        self.remaining.clear();
    }

    pub(crate) fn device_num(&self) -> u8 {
        self.device_num
    }

    pub(crate) fn phase(&self) -> ClaimPhase {
        self.phase
    }

    pub(crate) fn is_active(&self) -> bool {
        self.phase == ClaimPhase::Active
    }

    fn is_claiming(&self) -> bool {
        matches!(
            self.phase,
            ClaimPhase::Stage1 | ClaimPhase::Stage2 | ClaimPhase::AwaitMixer | ClaimPhase::Stage3
        )
    }

    /// Interprets an incoming negotiation packet in the current phase.
    pub(crate) fn on_packet(&self, pkt: &proto::Packet) -> Option<ClaimSignal> {
        match pkt {
            proto::Packet::DeviceNumInUse(p)
                if self.is_claiming() && p.device_num == self.device_num =>
            {
                Some(ClaimSignal::Rejected)
            }
            proto::Packet::DeviceNumWillAssign(_)
                if matches!(self.phase, ClaimPhase::Stage1 | ClaimPhase::Stage2) =>
            {
                Some(ClaimSignal::WillAssign)
            }
            proto::Packet::DeviceNumAssign(p) if self.phase == ClaimPhase::AwaitMixer => {
                Some(ClaimSignal::Assigned(p.device_num))
            }
            proto::Packet::DeviceNumAssignFinished(_)
                if matches!(self.phase, ClaimPhase::AwaitMixer | ClaimPhase::Stage3) =>
            {
                Some(ClaimSignal::Finished)
            }
            proto::Packet::KeepAlive(p) if self.is_active() && p.device_num == self.device_num => {
                Some(ClaimSignal::Defend)
            }
            proto::Packet::DeviceNumClaim2(p)
                if self.is_active() && p.device_num == self.device_num =>
            {
                Some(ClaimSignal::Defend)
            }
            proto::Packet::DeviceNumClaim3(p)
                if self.is_active() && p.device_num == self.device_num =>
            {
                Some(ClaimSignal::Defend)
            }
            _ => None,
        }
    }
}

/// Receive loop for port 50000. Feeds the device registry, walks the
/// claim state machine to join the network, then announces and defends
/// the number it holds.
pub(crate) struct MembershipTask {
    config: Config,
    joined_tx: watch::Sender<JoinState>,
    publisher: Publisher,
    registry: Arc<DeviceRegistry>,
    ignore: IgnoreList,
    socket: UdpSocket,
    first_peer: Option<Ipv4Addr>,
    iface_addr: Option<Ipv4Addr>,
    claim: ClaimEngine,
    noted: NoteOnce<BadPacketKey>,
}

impl MembershipTask {
    pub(crate) async fn new(
        config: &Config,
        joined_tx: watch::Sender<JoinState>,
        publisher: Publisher,
        registry: Arc<DeviceRegistry>,
        ignore: IgnoreList,
    ) -> Result<MembershipTask> {
        let socket = UdpSocket::bind("0.0.0.0:50000").await?;
        socket.set_broadcast(true)?;

        Ok(MembershipTask {
            config: config.clone(),
            joined_tx,
            publisher,
            registry,
            ignore,
            socket,
            first_peer: None,
            iface_addr: None,
            claim: ClaimEngine::new(config),
            noted: NoteOnce::new(),
        })
    }

    pub(crate) async fn run(mut self) {
        match self.run_impl().await {
            Ok(()) | Err(DjLinkError::Terminating) => (),
            Err(e) => {
                error!(target: "djlink", "membership task error: {}", e);
                let _ = self.joined_tx.send(JoinState::Failed(e.to_string()));
                self.publisher.publish_stopped();
            }
        }
        // Leave everything claimable by a future incarnation of us.
        self.claim.reset();
        self.registry.clear();
        if let Some(addr) = self.iface_addr.take() {
            self.ignore.remove(addr);
        }
    }

    async fn run_impl(&mut self) -> Result<()> {
        self.discover().await?;

        let iface =
            crate::net::select_interface(self.config.interface_name.as_deref(), self.first_peer)?;
        info!(target: "djlink", "announcing from {} ({})", iface.name, iface.addr);
        self.ignore.add(iface.addr);
        self.iface_addr = Some(iface.addr);
        let broadcast = SocketAddr::new(IpAddr::V4(iface.broadcast), proto::PORT_ANNOUNCE);

        let device_num = self.negotiate(&iface, broadcast).await?;
        info!(target: "djlink", "joined as device {}", device_num);
        let _ = self.joined_tx.send(JoinState::Joined(device_num));

        self.keep_alive_loop(&iface, broadcast).await
    }

    // Idle phase: watch announcements so self-assignment can avoid the
    // numbers that are already taken. The watch period restarts from
    // the first announcement heard.
    async fn discover(&mut self) -> Result<()> {
        if self.config.device_number != 0 {
            return Ok(());
        }
        info!(target: "djlink", "watching for peers before claiming a device number");
        let started = Instant::now();
        loop {
            let since = self.registry.first_device_seen().unwrap_or(started);
            if Instant::now() - since >= SELF_ASSIGNMENT_WATCH_PERIOD {
                return Ok(());
            }
            self.sweep_expired().await?;
            self.wait_for(Instant::now() + Duration::from_millis(250), None)
                .await?;
        }
    }

    async fn negotiate(&mut self, iface: &Interface, broadcast: SocketAddr) -> Result<u8> {
        self.claim.begin_hello();
        for _ in 0..3 {
            self.send_hello(broadcast).await?;
            self.wait_for(Instant::now() + CLAIM_STEP, Some(iface))
                .await?;
        }

        loop {
            let candidate = self.claim.select_candidate(&self.registry)?;
            info!(target: "djlink", "claiming device number {}", candidate);
            if let Some(device_num) = self.claim_stages(candidate, iface, broadcast).await? {
                return Ok(device_num);
            }
        }
    }

    // One full three-stage claim of `candidate`. Returns None when the
    // claim was rejected and the next candidate should be tried.
    async fn claim_stages(
        &mut self,
        candidate: u8,
        iface: &Interface,
        broadcast: SocketAddr,
    ) -> Result<Option<u8>> {
        for pkt_num in 1..=3u8 {
            self.send_claim1(pkt_num, iface, broadcast).await?;
            match self.wait_for(Instant::now() + CLAIM_STEP, Some(iface)).await? {
                Some((ClaimSignal::Rejected, _)) => return Ok(None),
                Some((ClaimSignal::WillAssign, mixer)) => {
                    return self.mixer_assign(mixer, iface, broadcast).await
                }
                _ => (),
            }
        }

        self.claim.enter_stage2();
        let auto_assign = self.config.device_number == 0;
        for pkt_num in 1..=3u8 {
            self.send_claim2(candidate, pkt_num, auto_assign, iface, broadcast)
                .await?;
            match self.wait_for(Instant::now() + CLAIM_STEP, Some(iface)).await? {
                Some((ClaimSignal::Rejected, _)) => return Ok(None),
                Some((ClaimSignal::WillAssign, mixer)) => {
                    return self.mixer_assign(mixer, iface, broadcast).await
                }
                _ => (),
            }
        }

        self.claim.enter_stage3();
        for pkt_num in 1..=3u8 {
            self.send_claim3(candidate, pkt_num, broadcast).await?;
            match self.wait_for(Instant::now() + CLAIM_STEP, Some(iface)).await? {
                Some((ClaimSignal::Rejected, _)) => return Ok(None),
                Some((ClaimSignal::Finished, _)) => break,
                _ => (),
            }
        }

        self.claim.activate();
        Ok(Some(candidate))
    }

    // A mixer offered to pick our number: ask it directly and wait for
    // the verdict. Its choice is trusted even if the registry already
    // shows the number.
    async fn mixer_assign(
        &mut self,
        mixer: Ipv4Addr,
        iface: &Interface,
        broadcast: SocketAddr,
    ) -> Result<Option<u8>> {
        self.claim.enter_await_mixer();
        let mixer_addr = SocketAddr::new(IpAddr::V4(mixer), proto::PORT_ANNOUNCE);
        info!(target: "djlink", "waiting for {} to assign our device number", mixer);

        for pkt_num in 1..=3u8 {
            // The assignment request is a stage-2 claim with the
            // auto-assign flag, unicast to the mixer.
            self.send_claim2(self.claim.device_num(), pkt_num, true, iface, mixer_addr)
                .await?;
            match self.wait_for(Instant::now() + CLAIM_STEP, Some(iface)).await? {
                Some((ClaimSignal::Assigned(device_num), _)) => {
                    info!(target: "djlink", "mixer assigned us device number {}", device_num);
                    self.claim.adopt(device_num);
                    for pkt_num in 1..=3u8 {
                        self.send_claim3(device_num, pkt_num, broadcast).await?;
                        match self.wait_for(Instant::now() + CLAIM_STEP, Some(iface)).await? {
                            Some((ClaimSignal::Rejected, _)) => return Ok(None),
                            Some((ClaimSignal::Finished, _)) => break,
                            _ => (),
                        }
                    }
                    self.claim.activate();
                    return Ok(Some(device_num));
                }
                Some((ClaimSignal::Finished, _)) => {
                    let device_num = self.claim.device_num();
                    self.claim.activate();
                    return Ok(Some(device_num));
                }
                _ => (),
            }
        }

        debug!(target: "djlink", "mixer never assigned a number, resuming self-assignment");
        Ok(None)
    }

    async fn keep_alive_loop(&mut self, iface: &Interface, broadcast: SocketAddr) -> Result<()> {
        let interval = Duration::from_millis(self.config.announce_interval_ms);
        loop {
            self.sweep_expired().await?;
            self.send_keep_alive(iface, broadcast).await?;
            self.wait_for(Instant::now() + interval, Some(iface)).await?;
        }
    }

    /// Processes incoming traffic until the deadline, returning early
    /// when a packet changes the course of the claim. Registry expiry
    /// runs on a one-second tick while waiting.
    async fn wait_for(
        &mut self,
        deadline: Instant,
        iface: Option<&Interface>,
    ) -> Result<Option<(ClaimSignal, Ipv4Addr)>> {
        let timeout = time::sleep_until(deadline);
        tokio::pin!(timeout);
        let mut sweep = time::interval_at(
            Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let mut buf = [0; 4096];
        loop {
            tokio::select! {
                _ = &mut timeout => {
                    return Ok(None)
                }
                _ = sweep.tick() => {
                    self.sweep_expired().await?;
                }
                _ = self.publisher.closed() => {
                    return Err(DjLinkError::Terminating);
                }
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, src)) => {
                            if let Some(signal) =
                                self.handle_datagram(&buf[0..len], src, iface).await?
                            {
                                return Ok(Some(signal));
                            }
                        }
                        Err(e) => {
                            if self.publisher.is_closed() {
                                return Err(DjLinkError::Terminating);
                            }
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(
        &mut self,
        buf: &[u8],
        src: SocketAddr,
        iface: Option<&Interface>,
    ) -> Result<Option<(ClaimSignal, Ipv4Addr)>> {
        let src_ip = match src.ip() {
            IpAddr::V4(ip) => ip,
            _ => return Ok(None),
        };
        if self.ignore.contains(src_ip) {
            return Ok(None);
        }

        let pkt = match proto::Packet::parse(proto::PORT_ANNOUNCE, buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                log_packet_error(&mut self.noted, proto::PORT_ANNOUNCE, &e);
                return Ok(None);
            }
        };

        if let proto::Packet::KeepAlive(ka) = &pkt {
            if self.first_peer.is_none() {
                self.first_peer = Some(src_ip);
            }
            let device = Device {
                name: ka.name.clone(),
                device_num: ka.device_num,
                kind: DeviceKind::from_byte(ka.device_type),
                mac_addr: ka.mac_addr,
                ip_addr: Ipv4Addr::from(ka.ip_addr),
            };
            let (lost, found) = self.registry.on_announcement(device);
            if let Some(device) = lost {
                info!(target: "djlink", "device left: {} #{}", device.name, device.device_num);
                self.publisher.publish(Message::DeviceLost(device)).await?;
            }
            if let Some(device) = found {
                info!(target: "djlink", "device found: {} #{}", device.name, device.device_num);
                self.publisher.publish(Message::DeviceFound(device)).await?;
            }
        }

        match self.claim.on_packet(&pkt) {
            Some(ClaimSignal::Defend) => {
                if let Some(iface) = iface {
                    warn!(
                        target: "djlink",
                        "{} is moving in on device number {}, defending",
                        src_ip,
                        self.claim.device_num()
                    );
                    self.send_defense(iface, SocketAddr::new(IpAddr::V4(src_ip), proto::PORT_ANNOUNCE))
                        .await?;
                }
                Ok(None)
            }
            Some(signal) => Ok(Some((signal, src_ip))),
            None => Ok(None),
        }
    }

    async fn sweep_expired(&mut self) -> Result<()> {
        for device in self.registry.expire() {
            info!(target: "djlink", "device left: {} #{}", device.name, device.device_num);
            self.publisher.publish(Message::DeviceLost(device)).await?;
        }
        Ok(())
    }

    async fn send(&self, data: Vec<u8>, to: SocketAddr) -> Result<()> {
        self.socket.send_to(&data, to).await?;
        Ok(())
    }

    async fn send_hello(&self, to: SocketAddr) -> Result<()> {
        let pkt = proto::HelloPacket {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }

    async fn send_claim1(&self, pkt_num: u8, iface: &Interface, to: SocketAddr) -> Result<()> {
        let pkt = proto::DeviceNumClaim1Packet {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
            pkt_num,
            mac_addr: iface.mac_addr,
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }

    async fn send_claim2(
        &self,
        device_num: u8,
        pkt_num: u8,
        auto_assign: bool,
        iface: &Interface,
        to: SocketAddr,
    ) -> Result<()> {
        let pkt = proto::DeviceNumClaim2Packet {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
            ip_addr: iface.addr.octets(),
            mac_addr: iface.mac_addr,
            device_num,
            pkt_num,
            auto_assign,
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }

    async fn send_claim3(&self, device_num: u8, pkt_num: u8, to: SocketAddr) -> Result<()> {
        let pkt = proto::DeviceNumClaim3Packet {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
            device_num,
            pkt_num,
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }

    async fn send_keep_alive(&self, iface: &Interface, to: SocketAddr) -> Result<()> {
        debug_assert!(self.claim.is_active());
        let pkt = proto::KeepAlivePacket {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
            device_num: self.claim.device_num(),
            device_type: self.config.kind.announce_byte(),
            mac_addr: iface.mac_addr,
            ip_addr: iface.addr.octets(),
            peers_seen: self.registry.snapshot().len() as u8 + 1u8,
            unknown_35: 1,
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }

    async fn send_defense(&self, iface: &Interface, to: SocketAddr) -> Result<()> {
        let pkt = proto::DeviceNumInUsePacket {
            name: self.config.name.clone(),
            proto_ver: PROTO_VER,
            device_num: self.claim.device_num(),
            ip_addr: iface.addr.octets(),
        };
        let mut data = Vec::new();
        pkt.write(&mut data)?;
        self.send(data, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeviceKind;

    fn config(device_number: u8) -> Config {
        Config {
            device_number,
            ..Config::default()
        }
    }

    fn in_use(device_num: u8) -> proto::Packet {
        proto::Packet::DeviceNumInUse(proto::DeviceNumInUsePacket {
            name: "CDJ-900".to_string(),
            proto_ver: 2,
            device_num,
            ip_addr: [192, 168, 1, 5],
        })
    }

    fn will_assign() -> proto::Packet {
        proto::Packet::DeviceNumWillAssign(proto::DeviceNumWillAssignPacket {
            name: "DJM-900nexus".to_string(),
            proto_ver: 2,
        })
    }

    fn assign(device_num: u8) -> proto::Packet {
        proto::Packet::DeviceNumAssign(proto::DeviceNumAssignPacket {
            name: "DJM-900nexus".to_string(),
            proto_ver: 2,
            device_num,
        })
    }

    fn keep_alive(device_num: u8) -> proto::Packet {
        proto::Packet::KeepAlive(proto::KeepAlivePacket {
            name: "CDJ-900".to_string(),
            proto_ver: 2,
            device_num,
            device_type: 2,
            mac_addr: [0, 1, 2, 3, 4, 5],
            ip_addr: [192, 168, 1, 5],
            peers_seen: 1,
            unknown_35: 1,
        })
    }

    fn claim3(device_num: u8) -> proto::Packet {
        proto::Packet::DeviceNumClaim3(proto::DeviceNumClaim3Packet {
            name: "CDJ-900".to_string(),
            proto_ver: 2,
            device_num,
            pkt_num: 1,
        })
    }

    fn device(num: u8) -> Device {
        Device {
            name: "CDJ-900".to_string(),
            device_num: num,
            kind: DeviceKind::Cdj,
            mac_addr: [0, 1, 2, 3, 4, 5],
            ip_addr: std::net::Ipv4Addr::new(192, 168, 1, num),
        }
    }

    #[test]
    fn test_candidate_pools() {
        let engine = ClaimEngine::new(&config(0));
        assert_eq!(engine.candidate_pool(), (7..=15).collect::<Vec<u8>>());

        let engine = ClaimEngine::new(&Config {
            use_standard_player_number: true,
            ..config(0)
        });
        assert_eq!(engine.candidate_pool(), vec![1, 2, 3, 4]);

        let engine = ClaimEngine::new(&Config {
            kind: DeviceKind::Rekordbox,
            ..config(0)
        });
        assert_eq!(engine.candidate_pool(), (0x13..=0x27).collect::<Vec<u8>>());

        let engine = ClaimEngine::new(&config(3));
        assert_eq!(engine.candidate_pool(), vec![3]);
    }

    #[tokio::test]
    async fn test_candidates_skip_registry() {
        let registry = DeviceRegistry::new();
        registry.on_announcement(device(7));
        registry.on_announcement(device(8));

        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();
        assert_eq!(engine.select_candidate(&registry).unwrap(), 9);
        assert_eq!(engine.phase(), ClaimPhase::Stage1);
    }

    #[tokio::test]
    async fn test_rejection_advances_candidate() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();

        let first = engine.select_candidate(&registry).unwrap();
        assert_eq!(first, 7);

        // A defender answers our stage-1 claim.
        assert_eq!(engine.on_packet(&in_use(7)), Some(ClaimSignal::Rejected));
        // A defense of some other number is not about us.
        assert_eq!(engine.on_packet(&in_use(9)), None);

        assert_eq!(engine.select_candidate(&registry).unwrap(), 8);
    }

    #[tokio::test]
    async fn test_exhaustion_fails() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();

        for expected in 7..=15 {
            assert_eq!(engine.select_candidate(&registry).unwrap(), expected);
        }
        assert!(matches!(
            engine.select_candidate(&registry),
            Err(DjLinkError::NoFreeDeviceNumber)
        ));
        assert_eq!(engine.phase(), ClaimPhase::Failed);
    }

    #[tokio::test]
    async fn test_configured_number_already_taken_fails() {
        let registry = DeviceRegistry::new();
        registry.on_announcement(device(3));

        let mut engine = ClaimEngine::new(&config(3));
        engine.begin_hello();
        assert!(matches!(
            engine.select_candidate(&registry),
            Err(DjLinkError::NoFreeDeviceNumber)
        ));
    }

    #[tokio::test]
    async fn test_mixer_assignment_flow() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();
        engine.select_candidate(&registry).unwrap();

        // The offer only matters while we are in stages 1 and 2.
        assert_eq!(engine.on_packet(&will_assign()), Some(ClaimSignal::WillAssign));
        engine.enter_await_mixer();
        assert_eq!(engine.on_packet(&will_assign()), None);

        // Assignments are only accepted while we wait for the mixer.
        assert_eq!(engine.on_packet(&assign(3)), Some(ClaimSignal::Assigned(3)));
        engine.adopt(3);
        assert_eq!(engine.device_num(), 3);
        assert_eq!(engine.phase(), ClaimPhase::Stage3);
        assert!(!engine.is_active());

        engine.activate();
        assert!(engine.is_active());
        assert_eq!(engine.device_num(), 3);
    }

    #[tokio::test]
    async fn test_not_active_until_stage3_completes() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));

        assert!(!engine.is_active());
        engine.begin_hello();
        assert!(!engine.is_active());
        engine.select_candidate(&registry).unwrap();
        assert!(!engine.is_active());
        engine.enter_stage2();
        assert!(!engine.is_active());
        engine.enter_stage3();
        assert!(!engine.is_active());
        engine.activate();
        assert!(engine.is_active());
    }

    #[tokio::test]
    async fn test_defense_only_while_active() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();
        engine.select_candidate(&registry).unwrap();

        // Not ours yet, nothing to defend.
        assert_eq!(engine.on_packet(&keep_alive(7)), None);

        engine.enter_stage2();
        engine.enter_stage3();
        engine.activate();

        assert_eq!(engine.on_packet(&keep_alive(7)), Some(ClaimSignal::Defend));
        assert_eq!(engine.on_packet(&claim3(7)), Some(ClaimSignal::Defend));
        assert_eq!(engine.on_packet(&keep_alive(3)), None);
        assert_eq!(engine.on_packet(&claim3(3)), None);
    }

    #[tokio::test]
    async fn test_reset_clears_claim() {
        let registry = DeviceRegistry::new();
        let mut engine = ClaimEngine::new(&config(0));
        engine.begin_hello();
        engine.select_candidate(&registry).unwrap();
        engine.enter_stage2();
        engine.enter_stage3();
        engine.activate();

        engine.reset();
        assert_eq!(engine.phase(), ClaimPhase::Idle);
        assert_eq!(engine.device_num(), 0);
    }
}
