mod client;
mod protocol;

pub mod n2n;

pub use client::*;
pub use protocol::*;
