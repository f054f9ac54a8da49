pub mod jobs;
pub mod settings;
pub mod validation;
pub mod websocket;
