//! Local media inputs a room publishes once the microphone is enabled.

use crate::error::RealtimeError;
use async_trait::async_trait;

/// A capture device the room can start and stop.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Opens the device. Fails with [`RealtimeError::Device`] when it is missing
    /// or permission is denied.
    async fn acquire(&self) -> Result<(), RealtimeError>;

    fn release(&self);
}

/// An input that always opens and captures nothing. Used when the room only
/// carries control traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentInput;

#[async_trait]
impl AudioInput for SilentInput {
    async fn acquire(&self) -> Result<(), RealtimeError> {
        Ok(())
    }

    fn release(&self) {}
}
