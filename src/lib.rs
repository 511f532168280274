//! Real-time input automation engine.
//!
//! Keyboard and controller events are normalized into tokens, matched
//! against configured bindings, and turned into timed sequences of synthetic
//! key and mouse events.

pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod input_manager;
pub mod joystick;
pub mod keyboard;
pub mod observer;
pub mod output;
pub mod signal;
pub mod util;
pub mod xinput;

pub use binding::{Modifier, ModifierSet, Trigger, TriggerKind};
pub use config::{AppConfig, ConfigStore, MemoryStore, TomlConfigStore};
pub use engine::{Action, Collaborators, Engine, Token, TokenEvent};
pub use error::EngineError;
pub use output::{InputSink, NullSink, RecordingSink};
