pub mod chat;
pub mod context;
pub mod events;
pub mod models;
pub mod session;
