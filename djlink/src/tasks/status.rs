use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
};

use log::{error, warn};
use tokio::{net::UdpSocket, sync::mpsc};

use crate::{
    message::{
        Beat, CdjStatus, DeviceUpdate, Message, MixerStatus, PlayState1, PlayState2, PlayState3,
        TrackSlot, TrackType,
    },
    proto,
    tasks::{log_packet_error, BadPacketKey, BeatSync},
    util::NoteOnce,
    bus::Publisher,
    Config, DjLinkError, IgnoreList, Result,
};

// Datagram sizes the known hardware generations emit. Anything else is
// decoded anyway but flagged once.
const EXPECTED_STATUS_SIZES: [usize; 4] = [0xd0, 0xd4, 0x11c, 0x124];

/// Current tempo-master view, shared with the public handle.
#[derive(Debug, Default)]
pub(crate) struct MasterState {
    /// Device number of the current tempo master.
    pub master: Option<u8>,
    /// Effective tempo of the master in BPM.
    pub tempo: Option<f64>,
    /// Device the current master has agreed to yield to.
    pub yield_target: Option<u8>,
    /// Device that asked for the role and has not been answered yet.
    pub pending_request: Option<u8>,
}

/// Master and tempo bookkeeping, separated from the socket loop.
/// Methods return the messages to publish, already ordered: a master
/// change always precedes the tempo change from the same packet.
pub(crate) struct Tracker {
    tempo_epsilon: f64,
    updates: HashMap<u8, DeviceUpdate>,
    master: Arc<Mutex<MasterState>>,
}

impl Tracker {
    pub(crate) fn new(tempo_epsilon: f64, master: Arc<Mutex<MasterState>>) -> Tracker {
        Tracker {
            tempo_epsilon,
            updates: HashMap::new(),
            master,
        }
    }

    pub(crate) fn on_update(&mut self, update: DeviceUpdate) -> Vec<Message> {
        let device_num = update.device_num();
        let mut out = vec![Message::StatusUpdate(update.clone())];
        let mut master = self.master.lock().unwrap();

        if update.is_tempo_master() {
            let take_over = match master.master {
                None => true,
                Some(current) if current == device_num => false,
                Some(current) => {
                    if master.yield_target == Some(device_num) {
                        // The old master announced it would yield to
                        // this device.
                        true
                    } else {
                        match self.updates.get(&current) {
                            // Both still claim the role: higher sync
                            // counter wins, lower number breaks ties.
                            Some(cur) if cur.is_tempo_master() => {
                                let (new_sync, cur_sync) =
                                    (update.sync_counter(), cur.sync_counter());
                                new_sync > cur_sync
                                    || (new_sync == cur_sync && device_num < current)
                            }
                            _ => true,
                        }
                    }
                }
            };

            if take_over {
                master.master = Some(device_num);
                master.yield_target = None;
                master.pending_request = None;
                out.push(Message::MasterChanged(Some(device_num)));
            }

            if master.master == Some(device_num) {
                let tempo = update.effective_tempo();
                let changed = match master.tempo {
                    Some(old) => (tempo - old).abs() > self.tempo_epsilon,
                    None => true,
                };
                if changed {
                    master.tempo = Some(tempo);
                    out.push(Message::TempoChanged(tempo));
                }
            }
        } else if master.master == Some(device_num) {
            // The master resigned without a successor in sight.
            master.master = None;
            master.tempo = None;
            out.push(Message::MasterChanged(None));
        }

        if master.master == Some(device_num) {
            let target = update.handoff_target();
            if target != 0xff && target != 0 {
                master.yield_target = Some(target);
            }
        }

        self.updates.insert(device_num, update);
        out
    }

    pub(crate) fn on_beat(&mut self, beat: Beat) -> Vec<Message> {
        let mut out = Vec::new();
        let mut master = self.master.lock().unwrap();

        if master.master == Some(beat.device_num) {
            let tempo = beat.effective_tempo();
            let changed = match master.tempo {
                Some(old) => (tempo - old).abs() > self.tempo_epsilon,
                None => true,
            };
            out.push(Message::MasterBeat(beat));
            if changed {
                master.tempo = Some(tempo);
                out.push(Message::TempoChanged(tempo));
            }
        }
        out
    }

    pub(crate) fn on_handoff_request(&mut self, requester: u8) {
        self.master.lock().unwrap().pending_request = Some(requester);
    }

    pub(crate) fn on_handoff_response(&mut self, from: u8, yielded: bool) {
        let mut master = self.master.lock().unwrap();
        if yielded {
            // Pair the answer with the request that triggered it.
            if master.master == None || master.master == Some(from) {
                master.yield_target = master.pending_request.take();
            }
        } else {
            master.pending_request = None;
        }
    }
}

fn cdj_status(pkt: proto::CdjStatusPacket) -> CdjStatus {
    CdjStatus {
        name: pkt.name,
        device_num: pkt.device_num,
        track_source_player: pkt.track_source_player,
        track_slot: TrackSlot::from_byte(pkt.track_slot),
        track_type: TrackType::from_byte(pkt.track_type),
        rekordbox_id: pkt.rekordbox_id,
        play_state_1: PlayState1::from_byte(pkt.play_state_1),
        firmware_ver: pkt.firmware_ver,
        sync_counter: pkt.sync_counter,
        flags: pkt.flags,
        play_state_2: PlayState2::from_byte(pkt.play_state_2),
        play_state_3: PlayState3::from_byte(pkt.play_state_3),
        pitch_1: pkt.pitch_1,
        pitch_2: pkt.pitch_2,
        pitch_3: pkt.pitch_3,
        pitch_4: pkt.pitch_4,
        bpm: pkt.bpm,
        beat: if pkt.beat == u32::MAX {
            -1
        } else {
            pkt.beat as i64
        },
        cue_countdown: pkt.cue_countdown,
        beat_within_bar: pkt.beat_within_bar,
        handoff_target: pkt.handoff_target,
        packet_seq: pkt.packet_seq,
    }
}

fn mixer_status(pkt: proto::MixerStatusPacket) -> MixerStatus {
    MixerStatus {
        name: pkt.name,
        device_num: pkt.device_num,
        flags: pkt.flags,
        pitch: pkt.pitch,
        bpm: pkt.bpm,
        beat_within_bar: pkt.beat_within_bar,
    }
}

pub(crate) struct StatusTask {
    socket: UdpSocket,
    publisher: Publisher,
    ignore: IgnoreList,
    beat_rx: mpsc::Receiver<BeatSync>,
    tracker: Tracker,
    odd_sizes: NoteOnce<usize>,
    noted: NoteOnce<BadPacketKey>,
}

impl StatusTask {
    pub(crate) async fn new(
        config: &Config,
        publisher: Publisher,
        ignore: IgnoreList,
        beat_rx: mpsc::Receiver<BeatSync>,
        master: Arc<Mutex<MasterState>>,
    ) -> Result<StatusTask> {
        let socket = UdpSocket::bind("0.0.0.0:50002").await?;
        Ok(StatusTask {
            socket,
            publisher,
            ignore,
            beat_rx,
            tracker: Tracker::new(config.tempo_epsilon, master),
            odd_sizes: NoteOnce::new(),
            noted: NoteOnce::new(),
        })
    }

    pub(crate) async fn run(mut self) {
        match self.run_impl().await {
            Ok(()) | Err(DjLinkError::Terminating) => (),
            Err(e) => {
                error!(target: "djlink", "status task error: {}", e);
                self.publisher.publish_stopped();
            }
        }
    }

    async fn run_impl(&mut self) -> Result<()> {
        let mut buf = [0; 4096];
        loop {
            tokio::select! {
                _ = self.publisher.closed() => {
                    return Ok(())
                }
                res = self.beat_rx.recv() => {
                    match res {
                        Some(ev) => self.handle_beat_sync(ev).await?,
                        None => return Ok(()),
                    }
                }
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, src)) => {
                            if let IpAddr::V4(ip) = src.ip() {
                                if self.ignore.contains(ip) {
                                    continue;
                                }
                            }
                            self.handle_packet(&buf[0..len]).await?;
                        }
                        Err(e) => {
                            if self.publisher.is_closed() {
                                return Ok(());
                            }
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    async fn handle_beat_sync(&mut self, ev: BeatSync) -> Result<()> {
        let msgs = match ev {
            BeatSync::Beat(beat) => self.tracker.on_beat(beat),
            BeatSync::HandoffRequest { requester } => {
                self.tracker.on_handoff_request(requester);
                Vec::new()
            }
            BeatSync::HandoffResponse { from, yielded } => {
                self.tracker.on_handoff_response(from, yielded);
                Vec::new()
            }
        };
        for msg in msgs {
            self.publisher.publish(msg).await?;
        }
        Ok(())
    }

    async fn handle_packet(&mut self, buf: &[u8]) -> Result<()> {
        let update = match proto::Packet::parse(proto::PORT_STATUS, buf) {
            Ok(proto::Packet::CdjStatus(pkt)) => {
                if !EXPECTED_STATUS_SIZES.contains(&pkt.len) && self.odd_sizes.note(pkt.len) {
                    warn!(
                        target: "djlink",
                        "{} sent a status packet of unexpected size 0x{:x}",
                        pkt.name, pkt.len
                    );
                }
                DeviceUpdate::Cdj(cdj_status(pkt))
            }
            Ok(proto::Packet::MixerStatus(pkt)) => DeviceUpdate::Mixer(mixer_status(pkt)),
            Ok(_) => return Ok(()),
            Err(e) => {
                log_packet_error(&mut self.noted, proto::PORT_STATUS, &e);
                return Ok(());
            }
        };

        for msg in self.tracker.on_update(update) {
            self.publisher.publish(msg).await?;
        }
        Ok(())
    }
}
