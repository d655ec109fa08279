//! The RESP2 wire codec (C3): inbound frame detection/parsing and outbound
//! reply encoding. Byte strings are 8-bit-clean throughout; nothing here
//! assumes UTF-8.

mod encode;
mod frame;

pub use encode::*;
pub use frame::{parse_frame, Frame};
