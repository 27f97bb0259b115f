pub mod booking_client;
pub mod booking_mapper;
pub mod config;
pub mod error;
pub mod session_refresher;
pub mod snapshot_repository;
pub mod storage;
pub mod token_source;
