pub mod commands;
pub mod connection;
pub mod modbus;
pub mod output;
pub mod poll;
pub mod register_map;
pub mod registers;
pub mod schema;
