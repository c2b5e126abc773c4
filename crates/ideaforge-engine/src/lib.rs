pub mod backend;
pub mod client;
pub mod config;
pub mod dryrun;
pub mod error;
pub mod files;
pub mod gemini;
pub mod prompts;
pub mod retry;
pub mod state;
pub mod studio;
pub mod visualizer;

pub use client::{GenerationClient, ListingContent, ModelChoice};
pub use config::{build_client, EngineConfig};
pub use error::GenerationError;
pub use prompts::ColorMode;
pub use state::{Action, Effect, SessionState, Variations};
pub use studio::Studio;
pub use visualizer::VisualizerAction;
