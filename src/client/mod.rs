#[allow(clippy::module_inception)]
mod client;
mod spec;

pub use client::MemberClient;
pub use spec::PeerClient;
