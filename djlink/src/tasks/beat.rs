use std::net::IpAddr;

use log::{debug, error};
use tokio::{net::UdpSocket, sync::mpsc};

use crate::{
    bus::Publisher,
    message::{
        Beat, ChannelsOnAir, MasterHandoff, Message, PrecisePosition, SyncCommand,
    },
    proto,
    tasks::{log_packet_error, BadPacketKey, BeatSync},
    util::NoteOnce,
    DjLinkError, IgnoreList, Result,
};

/// Receive loop for port 50001: beats, sync commands, on-air flags,
/// master handoff, and precise positions, fanned out to subscribers and
/// mirrored to the status task where the master bookkeeping lives.
pub(crate) struct BeatTask {
    socket: UdpSocket,
    publisher: Publisher,
    ignore: IgnoreList,
    status_tx: mpsc::Sender<BeatSync>,
    noted: NoteOnce<BadPacketKey>,
}

impl BeatTask {
    pub(crate) async fn new(
        publisher: Publisher,
        ignore: IgnoreList,
        status_tx: mpsc::Sender<BeatSync>,
    ) -> Result<BeatTask> {
        let socket = UdpSocket::bind("0.0.0.0:50001").await?;
        Ok(BeatTask {
            socket,
            publisher,
            ignore,
            status_tx,
            noted: NoteOnce::new(),
        })
    }

    pub(crate) async fn run(mut self) {
        match self.run_impl().await {
            Ok(()) | Err(DjLinkError::Terminating) => (),
            Err(e) => {
                error!(target: "djlink", "beat task error: {}", e);
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
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, src)) => {
                            if let IpAddr::V4(ip) = src.ip() {
                                if self.ignore.contains(ip) {
                                    continue;
                                }
                            }
                            self.handle_datagram(&buf[0..len]).await?;
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

    async fn to_status(&self, ev: BeatSync) -> Result<()> {
        self.status_tx
            .send(ev)
            .await
            .map_err(|_| DjLinkError::Terminating)
    }

    async fn handle_datagram(&mut self, buf: &[u8]) -> Result<()> {
        let pkt = match proto::Packet::parse(proto::PORT_BEAT, buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                log_packet_error(&mut self.noted, proto::PORT_BEAT, &e);
                return Ok(());
            }
        };

        match pkt {
            proto::Packet::Beat(pkt) => {
                let beat = Beat {
                    name: pkt.name,
                    device_num: pkt.device_num,
                    next_beat: pkt.next_beat,
                    second_beat: pkt.second_beat,
                    next_bar: pkt.next_bar,
                    fourth_beat: pkt.fourth_beat,
                    second_bar: pkt.second_bar,
                    eighth_beat: pkt.eighth_beat,
                    pitch: pkt.pitch,
                    bpm: pkt.bpm,
                    beat_within_bar: pkt.beat,
                };
                self.publisher.publish(Message::Beat(beat.clone())).await?;
                self.to_status(BeatSync::Beat(beat)).await?;
            }
            proto::Packet::PrecisePosition(pkt) => {
                self.publisher
                    .publish(Message::PrecisePosition(PrecisePosition {
                        name: pkt.name,
                        device_num: pkt.device_num,
                        beat_number: pkt.beat_number,
                        position_ms: pkt.position_ms,
                        pitch: pkt.pitch,
                        bpm: pkt.bpm,
                    }))
                    .await?;
            }
            proto::Packet::SyncControl(pkt) => {
                self.publisher
                    .publish(Message::SyncCommand {
                        device_num: pkt.device_num,
                        command: SyncCommand::from_byte(pkt.command),
                    })
                    .await?;
            }
            proto::Packet::ChannelsOnAir(pkt) => {
                let mut channels = [false; 4];
                for (on, raw) in channels.iter_mut().zip(pkt.channels.iter()) {
                    *on = *raw != 0;
                }
                self.publisher
                    .publish(Message::ChannelsOnAir(ChannelsOnAir {
                        device_num: pkt.device_num,
                        channels,
                    }))
                    .await?;
            }
            proto::Packet::MasterHandoffRequest(pkt) => {
                self.publisher
                    .publish(Message::MasterHandoff(MasterHandoff::Request {
                        requester: pkt.device_num,
                    }))
                    .await?;
                self.to_status(BeatSync::HandoffRequest {
                    requester: pkt.device_num,
                })
                .await?;
            }
            proto::Packet::MasterHandoffResponse(pkt) => {
                self.publisher
                    .publish(Message::MasterHandoff(MasterHandoff::Response {
                        device_num: pkt.device_num,
                        yielded: pkt.yielded,
                    }))
                    .await?;
                self.to_status(BeatSync::HandoffResponse {
                    from: pkt.device_num,
                    yielded: pkt.yielded,
                })
                .await?;
            }
            proto::Packet::FaderStart(pkt) => {
                // Recognized but not acted on.
                debug!(target: "djlink", "fader start from device {}", pkt.device_num);
            }
            _ => (),
        }
        Ok(())
    }
}
