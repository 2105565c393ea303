use log::{debug, warn};

use crate::{message::Beat, util::NoteOnce, DjLinkError};

pub(crate) mod beat;
pub(crate) mod membership;
pub(crate) mod status;

/// Signature of a discarded datagram, used to throttle logging to one
/// warning per distinct kind of noise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BadPacketKey {
    Type { port: u16, packet_type: u8 },
    Port { port: u16 },
    Magic { port: u16 },
    Truncated { port: u16 },
}

/// Unrecognized packets get one warning per signature, then drop to
/// debug. Packets that merely failed field extraction stay at debug,
/// matching how chatty a busy booth network is.
pub(crate) fn log_packet_error(noted: &mut NoteOnce<BadPacketKey>, port: u16, e: &DjLinkError) {
    let key = match e {
        DjLinkError::UnknownPacket { port, packet_type } => Some(BadPacketKey::Type {
            port: *port,
            packet_type: *packet_type,
        }),
        DjLinkError::UnknownPort { port } => Some(BadPacketKey::Port { port: *port }),
        DjLinkError::BadMagic => Some(BadPacketKey::Magic { port }),
        DjLinkError::TruncatedPacket { .. } => Some(BadPacketKey::Truncated { port }),
        _ => None,
    };

    match key {
        Some(key) => {
            if noted.note(key) {
                warn!(target: "djlink", "ignoring packets on port {}: {}", port, e);
            } else {
                debug!(target: "djlink", "ignoring packet on port {}: {}", port, e);
            }
        }
        None => debug!(target: "djlink", "error parsing packet on port {}: {}", port, e),
    }
}

/// Beat-port traffic the status task needs for master and tempo
/// bookkeeping.
#[derive(Clone, Debug)]
pub(crate) enum BeatSync {
    Beat(Beat),
    HandoffRequest { requester: u8 },
    HandoffResponse { from: u8, yielded: bool },
}
