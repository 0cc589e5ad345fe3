pub mod alert;
pub mod client;
