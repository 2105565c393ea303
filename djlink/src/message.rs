use std::net::Ipv4Addr;

use serde::Serialize;
use strum::Display;

use crate::util;

/// What a peer announced itself as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum DeviceKind {
    Cdj,
    Mixer,
    Rekordbox,
    Unknown(u8),
}

impl DeviceKind {
    pub fn from_byte(b: u8) -> DeviceKind {
        match b {
            0x01 | 0x02 => DeviceKind::Cdj,
            0x03 => DeviceKind::Mixer,
            0x04 => DeviceKind::Rekordbox,
            _ => DeviceKind::Unknown(b),
        }
    }

    /// The device-kind byte we put in our own keep-alives.
    pub(crate) fn announce_byte(&self) -> u8 {
        match self {
            DeviceKind::Cdj => 0x02,
            DeviceKind::Mixer => 0x03,
            DeviceKind::Rekordbox => 0x04,
            DeviceKind::Unknown(b) => *b,
        }
    }
}

/// A device currently visible on the network.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub device_num: u8,
    pub kind: DeviceKind,
    pub mac_addr: [u8; 6],
    pub ip_addr: Ipv4Addr,
}

/// Media slot a loaded track came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum TrackSlot {
    None,
    Cd,
    Sd,
    Usb,
    Collection,
    Unknown(u8),
}

impl TrackSlot {
    pub fn from_byte(b: u8) -> TrackSlot {
        match b {
            0 => TrackSlot::None,
            1 => TrackSlot::Cd,
            2 => TrackSlot::Sd,
            3 => TrackSlot::Usb,
            4 => TrackSlot::Collection,
            _ => TrackSlot::Unknown(b),
        }
    }
}

/// Analysis category of a loaded track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum TrackType {
    None,
    Rekordbox,
    Unanalyzed,
    CdDigitalAudio,
    Unknown(u8),
}

impl TrackType {
    pub fn from_byte(b: u8) -> TrackType {
        match b {
            0 => TrackType::None,
            1 => TrackType::Rekordbox,
            2 => TrackType::Unanalyzed,
            5 => TrackType::CdDigitalAudio,
            _ => TrackType::Unknown(b),
        }
    }
}

/// Player deck state as reported in the primary play-state byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum PlayState1 {
    NoTrack,
    Loading,
    Playing,
    Looping,
    Paused,
    Cued,
    CuePlaying,
    CueScratching,
    Searching,
    Ended,
    Unknown(u8),
}

impl PlayState1 {
    pub fn from_byte(b: u8) -> PlayState1 {
        match b {
            0 => PlayState1::NoTrack,
            2 => PlayState1::Loading,
            3 => PlayState1::Playing,
            4 => PlayState1::Looping,
            5 => PlayState1::Paused,
            6 => PlayState1::Cued,
            7 => PlayState1::CuePlaying,
            8 => PlayState1::CueScratching,
            9 => PlayState1::Searching,
            17 => PlayState1::Ended,
            _ => PlayState1::Unknown(b),
        }
    }
}

/// Coarse moving/stopped state from the secondary play-state byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum PlayState2 {
    Moving,
    Stopped,
    Unknown(u8),
}

impl PlayState2 {
    pub fn from_byte(b: u8) -> PlayState2 {
        match b {
            0x6a | 0x7a | 0xfa => PlayState2::Moving,
            0x6e | 0x7e | 0xfe => PlayState2::Stopped,
            _ => PlayState2::Unknown(b),
        }
    }
}

/// Playback direction detail from the tertiary play-state byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum PlayState3 {
    None,
    PausedOrReverse,
    ForwardVinyl,
    ForwardCdj,
    Unknown(u8),
}

impl PlayState3 {
    pub fn from_byte(b: u8) -> PlayState3 {
        match b {
            0 => PlayState3::None,
            1 => PlayState3::PausedOrReverse,
            9 => PlayState3::ForwardVinyl,
            13 => PlayState3::ForwardCdj,
            _ => PlayState3::Unknown(b),
        }
    }
}

const FLAG_PLAYING: u8 = 0x40;
const FLAG_MASTER: u8 = 0x20;
const FLAG_SYNCED: u8 = 0x10;
const FLAG_ON_AIR: u8 = 0x08;

/// Latest reported state of a player deck.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CdjStatus {
    pub name: String,
    pub device_num: u8,
    pub track_source_player: u8,
    pub track_slot: TrackSlot,
    pub track_type: TrackType,
    pub rekordbox_id: u32,
    pub play_state_1: PlayState1,
    pub firmware_ver: String,
    pub sync_counter: u32,
    pub flags: u8,
    pub play_state_2: PlayState2,
    pub play_state_3: PlayState3,
    pub pitch_1: u32,
    pub pitch_2: u32,
    pub pitch_3: u32,
    pub pitch_4: u32,
    /// Track tempo in hundredths of a BPM.
    pub bpm: u16,
    /// Absolute beat counter, -1 when the track has no beat grid.
    pub beat: i64,
    pub cue_countdown: u16,
    /// 1..=4, 0 when unknown.
    pub beat_within_bar: u8,
    /// Device we are yielding tempo master to, 0xff when none.
    pub handoff_target: u8,
    pub packet_seq: u32,
}

impl CdjStatus {
    pub fn is_playing(&self) -> bool {
        self.flags & FLAG_PLAYING != 0
    }

    pub fn is_synced(&self) -> bool {
        self.flags & FLAG_SYNCED != 0
    }

    pub fn is_tempo_master(&self) -> bool {
        self.flags & FLAG_MASTER != 0
    }

    pub fn is_on_air(&self) -> bool {
        self.flags & FLAG_ON_AIR != 0
    }

    /// Tempo in BPM after applying the current pitch.
    pub fn effective_tempo(&self) -> f64 {
        self.bpm as f64 / 100.0 * util::pitch_to_multiplier(self.pitch_1)
    }
}

/// Latest reported state of a mixer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MixerStatus {
    pub name: String,
    pub device_num: u8,
    pub flags: u8,
    pub pitch: u32,
    /// Tempo in hundredths of a BPM.
    pub bpm: u16,
    pub beat_within_bar: u8,
}

impl MixerStatus {
    pub fn is_synced(&self) -> bool {
        self.flags & FLAG_SYNCED != 0
    }

    pub fn is_tempo_master(&self) -> bool {
        self.flags & FLAG_MASTER != 0
    }

    pub fn effective_tempo(&self) -> f64 {
        self.bpm as f64 / 100.0 * util::pitch_to_multiplier(self.pitch)
    }
}

/// Either kind of periodic status report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DeviceUpdate {
    Cdj(CdjStatus),
    Mixer(MixerStatus),
}

impl DeviceUpdate {
    pub fn device_num(&self) -> u8 {
        match self {
            DeviceUpdate::Cdj(s) => s.device_num,
            DeviceUpdate::Mixer(s) => s.device_num,
        }
    }

    pub fn is_tempo_master(&self) -> bool {
        match self {
            DeviceUpdate::Cdj(s) => s.is_tempo_master(),
            DeviceUpdate::Mixer(s) => s.is_tempo_master(),
        }
    }

    pub fn effective_tempo(&self) -> f64 {
        match self {
            DeviceUpdate::Cdj(s) => s.effective_tempo(),
            DeviceUpdate::Mixer(s) => s.effective_tempo(),
        }
    }

    /// Mixers do not carry a sync counter; they report 0.
    pub fn sync_counter(&self) -> u32 {
        match self {
            DeviceUpdate::Cdj(s) => s.sync_counter,
            DeviceUpdate::Mixer(_) => 0,
        }
    }

    pub fn handoff_target(&self) -> u8 {
        match self {
            DeviceUpdate::Cdj(s) => s.handoff_target,
            DeviceUpdate::Mixer(_) => 0xff,
        }
    }
}

/// A single beat announcement from a device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Beat {
    pub name: String,
    pub device_num: u8,
    /// Milliseconds until the next beat, bar, and further subdivisions,
    /// at the current tempo.
    pub next_beat: u32,
    pub second_beat: u32,
    pub next_bar: u32,
    pub fourth_beat: u32,
    pub second_bar: u32,
    pub eighth_beat: u32,
    pub pitch: u32,
    /// Track tempo in hundredths of a BPM.
    pub bpm: u16,
    /// 1..=4, 0 when unknown.
    pub beat_within_bar: u8,
}

impl Beat {
    pub fn effective_tempo(&self) -> f64 {
        self.bpm as f64 / 100.0 * util::pitch_to_multiplier(self.pitch)
    }
}

/// High-resolution playback position report (CDJ-3000 and later).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PrecisePosition {
    pub name: String,
    pub device_num: u8,
    pub beat_number: u32,
    pub position_ms: u32,
    pub pitch: u32,
    pub bpm: u16,
}

/// Which mixer channels are currently audible.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelsOnAir {
    pub device_num: u8,
    pub channels: [bool; 4],
}

/// Command byte of a sync-control packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum SyncCommand {
    BecomeMaster,
    SyncOn,
    SyncOff,
    Unknown(u8),
}

impl SyncCommand {
    pub fn from_byte(b: u8) -> SyncCommand {
        match b {
            0x01 => SyncCommand::BecomeMaster,
            0x10 => SyncCommand::SyncOn,
            0x20 => SyncCommand::SyncOff,
            _ => SyncCommand::Unknown(b),
        }
    }
}

/// One step of the tempo-master handoff conversation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum MasterHandoff {
    /// `requester` wants to take over tempo master.
    Request { requester: u8 },
    /// The current master's answer.
    Response { device_num: u8, yielded: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Message {
    DeviceFound(Device),
    DeviceLost(Device),
    StatusUpdate(DeviceUpdate),
    Beat(Beat),
    /// A beat from the device that is currently tempo master.
    MasterBeat(Beat),
    PrecisePosition(PrecisePosition),
    /// New tempo master by device number, or None when the master
    /// resigned without a successor.
    MasterChanged(Option<u8>),
    /// New master tempo in BPM.
    TempoChanged(f64),
    SyncCommand {
        device_num: u8,
        command: SyncCommand,
    },
    ChannelsOnAir(ChannelsOnAir),
    MasterHandoff(MasterHandoff),
    /// A receive loop died; the network view is no longer being updated.
    Stopped,
}
