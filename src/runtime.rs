use std::{future::Future, time::Instant};

use crate::IntervalGateError;

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-smol")))]
compile_error!("enable one of the `runtime-tokio` or `runtime-smol` features");

#[cfg(feature = "runtime-tokio")]
pub(crate) fn spawn_task<F>(fut: F) -> Result<(), IntervalGateError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|err| IntervalGateError::TimerScheduling(err.to_string()))?;
    handle.spawn(fut);
    Ok(())
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) fn spawn_task<F>(fut: F) -> Result<(), IntervalGateError>
where
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(fut).detach();
    Ok(())
}

#[cfg(feature = "runtime-tokio")]
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) fn now() -> Instant {
    Instant::now()
}

#[cfg(feature = "runtime-tokio")]
pub(crate) async fn sleep_until(deadline: Instant) {
    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) async fn sleep_until(deadline: Instant) {
    smol::Timer::at(deadline).await;
}
