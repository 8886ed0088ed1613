pub mod audio;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod personality;
pub mod presentation;
pub mod recognizer;
pub mod tts;
pub mod wake;

pub use error::{CompanionError, Result};
