/// A cancellation context threaded through every connector operation (spec
/// §5): suspension at network I/O, buffer get/put, batch timers, and
/// backpressure channels all observe this token rather than blocking
/// forever. `Engine::stop` cancels the workflow's root token, and every
/// fiber observes that at its next suspension point.
pub type Context = tokio_util::sync::CancellationToken;
