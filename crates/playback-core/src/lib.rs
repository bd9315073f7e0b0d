pub mod buffer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod frame_queue;
pub mod media;
pub mod output;
pub mod player;
pub mod scheduler;
pub mod status;
pub mod stream;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::PlaybackConfig;
pub use player::{PlaybackState, Player, PlayerEvent};
pub use status::PlayerStatus;
