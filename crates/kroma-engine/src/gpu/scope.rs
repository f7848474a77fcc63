use anyhow::{anyhow, Result};

/// Runs `create` inside a validation error scope and returns what it built,
/// or the first validation error the device reported for it.
///
/// Creation calls report errors out of band; outside a scope they reach the
/// device's uncaptured-error handler instead of the caller.
pub fn validated<T>(device: &wgpu::Device, what: &str, create: impl FnOnce() -> T) -> Result<T> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match pollster::block_on(scope.pop()) {
        Some(err) => Err(anyhow!("{what} rejected by the device: {err}")),
        None => Ok(value),
    }
}
