//! NFSv4.0 open state: share reservations, open-owners and stateids
pub mod attr;
pub mod ops;
pub mod server;
pub mod state;


pub use server::{Context, OpenStateServer};
