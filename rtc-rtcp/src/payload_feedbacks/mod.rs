//! Payload-specific feedback (PSFB, PT=206) packets: RFC 4585 PLI/SLI/RPSI,
//! RFC 5104 FIR, and the REMB application feedback (draft-alvestrand-rmcat-remb).

pub mod full_intra_request;
pub mod picture_loss_indication;
pub mod receiver_estimated_max_bitrate;
pub mod slice_loss_indication;
