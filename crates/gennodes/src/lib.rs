//! Built-in node-type strategies
//!
//! Local nodes (input/output) resolve immediately; generation nodes build
//! provider prediction requests from their configuration payload and the
//! outputs of their upstream nodes.

mod image;
mod io;
mod text;
mod video;

pub use image::ImageGenStrategy;
pub use io::{InputStrategy, OutputStrategy};
pub use text::TextGenStrategy;
pub use video::VideoGenStrategy;

use genruntime::StrategyRegistry;
use std::sync::Arc;

/// Register all built-in strategies with a registry.
pub fn register_all(registry: &mut StrategyRegistry) {
    registry.register(Arc::new(io::InputStrategy));
    registry.register(Arc::new(io::OutputStrategy));
    registry.register(Arc::new(image::ImageGenStrategy));
    registry.register(Arc::new(video::VideoGenStrategy));
    registry.register(Arc::new(text::TextGenStrategy));
}
