//! Non-paced sender (§4.1): drives packets straight from the sequencer to
//! egress with no pacing delay. The paced variant is out of core scope.

use shared::error::Result;
use shared::time::Clock;

use crate::egress::{RtpPacketEgresser, Transport};
use crate::packet::{Packet, PacketKind, PacketMetadata};
use crate::sequence::Sequencer;

pub struct NonPacedSender<C: Clock> {
    sequencer: Sequencer,
    egress: RtpPacketEgresser<C>,
}

impl<C: Clock> NonPacedSender<C> {
    pub fn new(sequencer: Sequencer, egress: RtpPacketEgresser<C>) -> Self {
        Self { sequencer, egress }
    }

    /// Assigns a sequence number then immediately forwards to egress.
    /// Returns `Ok(None)` if the sequencer rejected the packet (e.g.
    /// padding-before-marker), `Ok(Some(n))` with bytes sent otherwise.
    pub fn send(
        &mut self,
        mut packet: Packet,
        meta: PacketMetadata,
        is_rtx_ssrc: bool,
        transport: &mut dyn Transport,
    ) -> Result<Option<usize>> {
        if !self.sequencer.assign(&mut packet, meta.kind, is_rtx_ssrc) {
            return Ok(None);
        }
        let n = self.egress.send_packet(packet, &meta, transport)?;
        Ok(Some(n))
    }

    pub fn send_batch(
        &mut self,
        packets: Vec<(Packet, PacketMetadata)>,
        transport: &mut dyn Transport,
    ) -> Result<usize> {
        let mut total = 0;
        for (packet, meta) in packets {
            let is_rtx = matches!(meta.kind, PacketKind::Retransmission);
            if let Some(n) = self.send(packet, meta, is_rtx, transport)? {
                total += n;
            }
        }
        Ok(total)
    }
}
