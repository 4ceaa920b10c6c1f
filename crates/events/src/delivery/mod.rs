//! External delivery channels.
//!
//! In-app delivery goes through [`crate::ws::ConnectionRegistry`]; this
//! module holds the transports that leave the process.

pub mod email;
