//! Transmit-side packetization.

use crate::error::{AoipError, AoipResult};
use crate::session::Session;
use crate::wire::{RTP_HEADER_SIZE, RtpHeader};

/// Slices one engine frame into `packet_per_frame` transport packets,
/// stamping each with the session's sequence and timestamp cursor.
///
/// `frame` must hold `frame_samples * channels * byte_depth` interleaved
/// bytes. The emit closure receives each finished packet; sending is the
/// caller's concern so this path stays testable without sockets.
pub fn packetize_frame(
    session: &mut Session,
    frame: &[u8],
    mut emit: impl FnMut(&[u8]),
) -> AoipResult<()> {
    let stride = session.channels as usize * session.byte_depth as usize;
    let expected = session.frame_samples as usize * stride;
    if frame.len() != expected || session.packet_per_frame == 0 {
        return Err(AoipError::ConfigurationInvalid {
            reason: "transmit frame does not match the session's packetization",
        });
    }

    let pack_bytes = session.pack_samples as usize * stride;
    let mut packet = Vec::with_capacity(RTP_HEADER_SIZE + pack_bytes);

    for index in 0..session.packet_per_frame {
        session.packet_index = index;
        let start = index as usize * pack_bytes;

        packet.clear();
        RtpHeader {
            seq: session.seq,
            timestamp: session.timestamp,
            ssrc: session.session_id,
        }
        .encode(&mut packet);
        packet.extend_from_slice(&frame[start..start + pack_bytes]);
        emit(&packet);

        session.seq = session.seq.wrapping_add(1);
        session.timestamp = session.timestamp.wrapping_add(session.pack_samples as u32);
        session.sample_index = session
            .sample_index
            .wrapping_add(session.pack_samples as u16);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::bind_session;
    use crate::session::SessionDescriptor;
    use crate::wire::RtpHeader;
    use std::net::Ipv4Addr;

    fn tx_session() -> Session {
        let mut session = Session::from_descriptor(&SessionDescriptor {
            device_name: "local".into(),
            session_id: 99,
            session_ver: 1,
            session_loc: String::new(),
            transmitter_ip: Ipv4Addr::LOCALHOST,
            transmitter_port: 5004,
            multicast_group: Ipv4Addr::new(239, 0, 0, 9),
            sample_rate: 48_000,
            channels: 2,
            byte_depth: 3,
            pack_samples: 16,
            channel_offset: 0,
        });
        bind_session(&mut session, 64).unwrap();
        session
    }

    #[test]
    fn frame_splits_into_sequenced_packets() {
        let mut session = tx_session();
        let stride = 2 * 3;
        let frame: Vec<u8> = (0..64 * stride).map(|i| i as u8).collect();

        let mut packets = Vec::new();
        packetize_frame(&mut session, &frame, |p| packets.push(p.to_vec())).unwrap();

        assert_eq!(packets.len(), 4);
        for (i, packet) in packets.iter().enumerate() {
            let (header, payload) = RtpHeader::decode(packet).unwrap();
            assert_eq!(header.seq, i as u16);
            assert_eq!(header.timestamp, (i * 16) as u32);
            assert_eq!(header.ssrc, 99);
            assert_eq!(payload, &frame[i * 16 * stride..(i + 1) * 16 * stride]);
        }

        assert_eq!(session.seq, 4);
        assert_eq!(session.timestamp, 64);
    }

    #[test]
    fn sequence_wraps_at_u16() {
        let mut session = tx_session();
        session.seq = u16::MAX;
        let frame = vec![0u8; 64 * 6];

        let mut seqs = Vec::new();
        packetize_frame(&mut session, &frame, |p| {
            seqs.push(RtpHeader::decode(p).unwrap().0.seq);
        })
        .unwrap();

        assert_eq!(seqs, vec![u16::MAX, 0, 1, 2]);
    }

    #[test]
    fn wrong_frame_length_is_rejected() {
        let mut session = tx_session();
        assert!(matches!(
            packetize_frame(&mut session, &[0u8; 10], |_| {}),
            Err(AoipError::ConfigurationInvalid { .. })
        ));
    }
}
