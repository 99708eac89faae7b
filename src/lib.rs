pub mod account;
pub mod banner;
pub mod classify;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod remote;
pub mod stages;
pub mod store;
