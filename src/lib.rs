//! Consult library exports for testing

pub mod backend;
pub mod client;
pub mod core;

#[cfg(test)]
pub mod test_support;
