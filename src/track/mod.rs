//! Track identity: the per-source store and the frame associator that feeds it.

mod associator;
mod store;

pub use associator::{Associator, FrameTransitions};
pub use store::{BehaviorState, Observation, Track, TrackId, TrackStore};
