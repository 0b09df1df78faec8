pub mod broker;
pub mod connection;
pub mod entity_service;
pub mod events;
