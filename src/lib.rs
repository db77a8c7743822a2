pub mod approval;
pub mod balance;
pub mod batch;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod models;
pub mod monitor;
pub mod positions;
pub mod redeem;
pub mod shares;
pub mod wallet;
