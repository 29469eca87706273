pub mod engine;
pub mod loop_control;
pub mod session;
pub mod state;
pub mod transcript;
