pub mod board;
pub mod frames;
pub mod models;
pub mod placements;
pub mod sender;
pub mod settings;
