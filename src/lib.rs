mod bind;
pub mod codec;
mod device;
mod discovery;
mod error;
mod property;
pub mod protocol;
mod transport;
mod types;

pub use bind::{BindState, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT, Handshake, HandshakeBuilder, bind};
pub use codec::{Envelope, GENERIC_KEY, Key, SessionKey, decode, encode};
pub use device::{Device, DeviceBuilder, MAX_UNANSWERED};
pub use discovery::{DISCOVERY_PORT, Discovery, DiscoveryBuilder, LIMITED_BROADCAST, Scan};
pub use error::{BindError, DecodeError, Error, ProtocolError, Result, TransportError, ValidationError};
pub use property::{Domain, HUMIDITY_MAX, HUMIDITY_MIN, HUMIDITY_STEP, PropertyId, PropertyMap, PropertyValue};
pub use types::*;
