//! # Route Groups
//!
//! One module per caller role, each returning a `Router<SharedState>`.

pub mod admin;
pub mod cart;
pub mod health;
pub mod orders;
pub mod partner;

#[cfg(test)]
pub(crate) mod test_support;
