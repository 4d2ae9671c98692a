//! Types shared between the survey server, its service layer and clients.

pub mod domain;
pub mod error;
pub mod protocol;
