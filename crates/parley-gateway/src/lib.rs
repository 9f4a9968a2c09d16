pub mod connection;
pub mod dispatcher;
pub mod push;
pub mod registry;
