pub mod api;
pub mod content;
pub mod events;
pub mod models;
