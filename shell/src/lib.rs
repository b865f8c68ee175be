// VoiceLab shell services
// Owns the worker supervisor and the clients built on top of it

pub mod config;
pub mod failure;
pub mod services;

pub use config::ShellConfig;
pub use failure::StartupFailure;
pub use services::ShellServices;
