//! Typed client for the autofailover monitor's query and operator API.

mod client;

pub use client::*;
