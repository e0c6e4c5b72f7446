pub mod download;
pub mod events;
pub mod groups;
pub mod process;
pub mod router;
