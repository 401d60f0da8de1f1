pub mod channel;
mod claim;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{spawn_block_clock, ChannelState};
pub use manager::ChannelManager;
