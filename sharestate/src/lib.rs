//! Share-reservation and open-state engine of an NFSv4.0 server

macro_rules! pub_use{
    ($($name:ident),+) => { $(mod $name; pub use $name::*;)+ }
}

pub mod config;
pub mod fs;
pub mod nfs4;
pub mod result;
pub mod xdr;

pub use config::ServerConfig;
pub use nfs4::{Context, OpenStateServer};
