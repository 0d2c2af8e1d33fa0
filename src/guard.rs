use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Fast-fail mutual exclusion for operations that rewrite the settings.
///
/// Entering never waits: a second caller gets [`Error::Locked`] while the
/// first still holds the guard.
#[derive(Debug, Default)]
pub struct Guard {
    lock: Mutex<()>,
}

/// Proof that the guard is held. Released on drop.
#[must_use]
#[derive(Debug)]
pub struct Entered<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Result<Entered<'_>> {
        match self.lock.try_lock() {
            Ok(held) => Ok(Entered(held)),
            Err(_) => {
                log::info!("Settings mutation rejected, the settings lock is held");
                Err(Error::Locked)
            }
        }
    }
}
