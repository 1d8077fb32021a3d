//! EMV Common - Shared data structures and utilities for EMV processing
//!
//! * [`tlv`]: BER-TLV codec
//! * [`tags`]: tag identifiers and the immutable tag registry
//! * [`util`]: BCD, Luhn and padding helpers

pub mod tags;
pub mod tlv;
pub mod util;

pub use tags::{EmvTag, ResolvedTag, TagDescriptor, TagRegistry, ValueType};
pub use tlv::{find_tag, parse_all, BerTlv, TlvError, TlvReader};
