pub mod channel;
pub mod client;
pub mod error;

pub use channel::{Channel, CloseCallback, DataCallback, Outbound};
pub use client::{ClientHandler, ClientOptions, M2mClient, State};
pub use error::Error;
