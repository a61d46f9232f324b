//! The default input device, probed with cpal before a call is joined.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use kiyomi_realtime::{AudioInput, RealtimeError};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

#[async_trait]
impl AudioInput for CpalMicrophone {
    async fn acquire(&self) -> Result<(), RealtimeError> {
        tokio::task::spawn_blocking(|| {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| RealtimeError::Device("Requested device not found".to_string()))?;
            let config = device
                .default_input_config()
                .map_err(|e| RealtimeError::Device(e.to_string()))?;
            info!(
                device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                sample_rate = config.sample_rate().0,
                channels = config.channels(),
                "Microphone available"
            );
            Ok(())
        })
        .await
        .map_err(|e| RealtimeError::Device(e.to_string()))?
    }

    fn release(&self) {}
}
