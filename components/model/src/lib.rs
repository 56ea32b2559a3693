//! Value types shared by every layer of the broker: partition addressing, the Kafka error codes
//! the fetch path can produce, and the decoded shape of fetch requests and responses.
//!
//! Wire (de)serialization is not part of this crate; these types are what the protocol decoder
//! hands to the fetch engine and what the encoder receives back.

pub mod error_code;
pub mod fetch;
pub mod isolation;
pub mod ntp;
pub mod response;

pub use crate::error_code::ErrorCode;
pub use crate::isolation::IsolationLevel;
pub use crate::ntp::{Ntp, TopicPartition};
