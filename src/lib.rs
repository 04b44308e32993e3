pub mod cli;
pub mod config;
pub mod crlf;
pub mod encoder;
pub mod engine;
pub mod generator;
pub mod parser;
pub mod prober;
pub mod proxy;
pub mod transform;
pub mod webdav;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
