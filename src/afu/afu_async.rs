use std::time::Duration;

use async_io::Timer;

use super::Afu;
use super::PollConfig;
use crate::dmb;
use crate::Result;

// Spinning would starve the executor, so async polling always yields.
const MIN_POLL_INTERVAL: Duration = Duration::from_micros(10);

impl Afu {
    /// Like [`Afu::wait_until_nonzero`], but yields to the executor between
    /// reads instead of blocking the thread.
    pub async fn wait_until_nonzero_async(&self, addr: u64, poll: &PollConfig) -> Result<u64> {
        let interval = poll.sleep.unwrap_or(MIN_POLL_INTERVAL);
        loop {
            let value = self.read(addr)?;
            if value != 0 {
                dmb();
                return Ok(value);
            }
            Timer::after(interval).await;
        }
    }
}
