//! NoOp Interceptor - A pass-through terminal for interceptor chains.

use crate::{Interceptor, Packet, TaggedPacket};
use shared::error::Error;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::time::Instant;

/// A no-operation interceptor that simply queues messages for pass-through.
///
/// `NoopInterceptor` serves as the innermost layer of an interceptor chain.
/// It accepts messages via `handle_read`/`handle_write`/etc and returns them
/// unchanged via `poll_read`/`poll_write`/etc. Generic over the read/write/event
/// message types so it can terminate either a bare `Protocol` chain (as used
/// directly in tests) or a full `Interceptor` chain keyed on `TaggedPacket`.
///
/// # Example
///
/// ```ignore
/// use rtc_interceptor::NoopInterceptor;
/// use sansio::Protocol;
///
/// let mut noop = NoopInterceptor::new();
/// noop.handle_read(Packet::Rtp(...)).unwrap();
/// assert!(noop.poll_read().is_some());
/// ```
pub struct NoopInterceptor<Rin, Win, Ein> {
    read_queue: VecDeque<Rin>,
    write_queue: VecDeque<Win>,
    _event: PhantomData<Ein>,
}

impl<Rin, Win, Ein> NoopInterceptor<Rin, Win, Ein> {
    /// Create a new NoopInterceptor.
    pub fn new() -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            _event: PhantomData,
        }
    }
}

impl<Rin, Win, Ein> Default for NoopInterceptor<Rin, Win, Ein> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Rin, Win, Ein> sansio::Protocol<Rin, Win, Ein> for NoopInterceptor<Rin, Win, Ein> {
    type Rout = Rin;
    type Wout = Win;
    type Eout = Ein;
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: Rin) -> Result<(), Self::Error> {
        self.read_queue.push_back(msg);
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.read_queue.pop_front()
    }

    fn handle_write(&mut self, msg: Win) -> Result<(), Self::Error> {
        self.write_queue.push_back(msg);
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_queue.pop_front()
    }

    fn handle_event(&mut self, _evt: Ein) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        None
    }

    fn handle_timeout(&mut self, _now: Self::Time) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        None
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.read_queue.clear();
        self.write_queue.clear();
        Ok(())
    }
}

impl Interceptor for NoopInterceptor<TaggedPacket, TaggedPacket, ()> {}

#[cfg(test)]
mod tests {
    use super::*;
    use sansio::Protocol;

    fn dummy_rtp_packet() -> Packet {
        Packet::Rtp(rtp::Packet::default())
    }

    #[test]
    fn test_noop_read_write() {
        let mut noop = NoopInterceptor::<Packet, Packet, ()>::new();

        // Test read
        let pkt1 = dummy_rtp_packet();
        let pkt2 = dummy_rtp_packet();
        noop.handle_read(pkt1.clone()).unwrap();
        noop.handle_read(pkt2.clone()).unwrap();
        assert_eq!(noop.poll_read(), Some(pkt1));
        assert_eq!(noop.poll_read(), Some(pkt2));
        assert_eq!(noop.poll_read(), None);

        // Test write
        let pkt3 = dummy_rtp_packet();
        let pkt4 = dummy_rtp_packet();
        noop.handle_write(pkt3.clone()).unwrap();
        noop.handle_write(pkt4.clone()).unwrap();
        assert_eq!(noop.poll_write(), Some(pkt3));
        assert_eq!(noop.poll_write(), Some(pkt4));
        assert_eq!(noop.poll_write(), None);
    }

    #[test]
    fn test_noop_close_clears_queues() {
        let mut noop = NoopInterceptor::<Packet, Packet, ()>::new();

        noop.handle_read(dummy_rtp_packet()).unwrap();
        noop.handle_write(dummy_rtp_packet()).unwrap();

        noop.close().unwrap();

        assert_eq!(noop.poll_read(), None);
        assert_eq!(noop.poll_write(), None);
    }
}
