#![doc = "Edge-timing engine, single-slot store and consumer gate for the lightpen driver."]

pub mod channel;
pub mod device;
pub mod engine;
pub mod lightpen;
pub mod lines;
pub mod poll;
pub mod sample;
#[cfg(feature = "simulated")]
pub mod sim;
pub mod slot;
pub mod speed;
pub mod timestamp;
pub mod waitset;

pub use channel::*;
pub use device::DeviceCore;
pub use engine::*;
pub use lightpen::*;
pub use lines::*;
pub use poll::*;
pub use sample::*;
#[cfg(feature = "simulated")]
pub use sim::*;
pub use slot::*;
pub use speed::*;
pub use timestamp::*;
pub use waitset::*;
