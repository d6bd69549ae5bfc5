pub mod config;
pub mod ensemble;
pub mod error;
pub mod feed;
pub mod logging;
pub mod models;
pub mod phase;
pub mod primes;
pub mod projection;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod triads;
pub mod validation;
