use std::sync::{Arc, Mutex};

pub mod browser;
pub mod calendar;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod mal;
pub mod server;
pub mod settings;
pub mod token;
pub mod trust;

pub use error::{Error, Result};

pub type Shared<T> = Arc<T>;
pub type Locked<T> = Mutex<T>;
