//! Object-safe wrapper so a compound RTCP datagram can hold a heterogeneous
//! list of report/feedback packets (RFC 3550 §6: "a compound packet...").

use shared::marshal::Marshal;
use std::any::Any;
use std::fmt::Debug;

/// A single RTCP packet that can sit inside a compound datagram.
///
/// Implemented for every concrete packet type in this crate via
/// [`impl_packet`]. `equal`/`clone_box`/`as_any` exist purely to make the
/// trait object behave like the `Clone + PartialEq` concrete types it
/// erases — downcasting with `as_any().downcast_ref` is how callers (e.g.
/// `rtc-interceptor`'s NACK generator) recover the concrete type.
pub trait Packet: Debug + Marshal + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn equal(&self, other: &dyn Packet) -> bool;
    fn clone_box(&self) -> Box<dyn Packet>;
}

impl PartialEq for Box<dyn Packet> {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().equal(other.as_ref())
    }
}

impl Clone for Box<dyn Packet> {
    fn clone(&self) -> Self {
        self.as_ref().clone_box()
    }
}

/// Generates the boilerplate [`Packet`] impl for a concrete `Debug + Clone
/// + PartialEq + Marshal` report/feedback type.
macro_rules! impl_packet {
    ($ty:ty) => {
        impl $crate::packet::Packet for $ty {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn equal(&self, other: &dyn $crate::packet::Packet) -> bool {
                other
                    .as_any()
                    .downcast_ref::<$ty>()
                    .is_some_and(|o| o == self)
            }

            fn clone_box(&self) -> Box<dyn $crate::packet::Packet> {
                Box::new(self.clone())
            }
        }
    };
}

pub(crate) use impl_packet;
