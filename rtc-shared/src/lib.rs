#![warn(rust_2018_idioms)]
#![allow(dead_code)]

#[cfg(feature = "marshal")]
pub mod marshal;

pub mod error;
pub mod time;
pub mod transport;
pub mod util;

pub use time::{Clock, DataRate, NtpTime, RealTimeClock, SimulatedClock, TimeDelta, Timestamp};
pub use transport::{
    EcnCodepoint, FiveTuple, FourTuple, TaggedBytesMut, TaggedString, TransportContext,
    TransportMessage, TransportProtocol,
};
