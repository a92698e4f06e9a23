pub mod events;
pub mod fanout;
pub mod handler;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod server;
pub mod unread;
pub mod users;
