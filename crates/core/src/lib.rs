#[macro_use]
extern crate lazy_static;

pub mod descriptor;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod regfile;
pub mod service;

#[cfg(windows)]
pub mod live;
