pub mod ask;
pub mod capabilities;
pub mod config_cmd;
pub mod init;
pub mod setup;
