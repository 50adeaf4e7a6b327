//! Bridge for driving async work from synchronous callers.

use std::future::Future;

use anyhow::{anyhow, bail};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;

/// Run `future` to completion from synchronous code.
///
/// # Arguments
/// - `future`: The future to drive. Its output is returned as-is.
///
/// # Returns
/// The future's output, or an error when no runtime can be used to drive it.
///
/// # Notes
/// - Inside a multi-threaded Tokio runtime the current worker is handed over
///   with `block_in_place` and the future runs on the existing runtime.
/// - Inside a current-thread runtime blocking would deadlock, so an error is
///   returned instead.
/// - Outside Tokio a throwaway current-thread runtime is built for the call.
pub fn block_on_future<F>(future: F) -> anyhow::Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
                bail!("cannot block on a future from inside a current-thread Tokio runtime");
            }
            Ok(task::block_in_place(|| handle.block_on(future)))
        }
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|error| anyhow!(error))?;
            Ok(runtime.block_on(future))
        }
    }
}
