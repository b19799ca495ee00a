//! Wire-level types shared by the webpubsub client and anything speaking its protocol.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
