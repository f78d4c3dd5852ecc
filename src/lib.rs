pub mod config;
pub mod feed;
pub mod flow;
pub mod models;
pub mod plans;
pub mod scheduler;
pub mod structure;
pub mod trading;

#[cfg(test)]
pub mod test_helpers;
