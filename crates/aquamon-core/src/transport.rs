//! Trait abstraction over the device transports.
//!
//! This module provides the [`DeviceTransport`] trait implemented by the HTTP
//! and BLE adapters and by [`crate::mock::MockTransport`]. A transport is
//! bound to one device configuration for its whole life; reconfiguring means
//! building a new transport.
//!
//! HTTP sensors are polled. BLE sensors push a notification per measurement;
//! such transports also hand out a [`TransportEvent`] stream, and the
//! coordinator follows that stream instead of polling once the link is up.

use async_trait::async_trait;
use tokio::sync::broadcast;

use aquamon_types::{ConnectionType, SensorReading};

use crate::error::Result;

/// Something a push transport reports without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The device sent a measurement.
    Reading(SensorReading),
    /// The link dropped or was closed.
    Disconnected,
}

/// Trait abstracting a connection to one tank sensor.
///
/// # Example
///
/// ```ignore
/// use aquamon_core::{DeviceTransport, Result};
///
/// async fn print_turbidity<T: DeviceTransport>(transport: &T) -> Result<()> {
///     let reading = transport.read().await?;
///     println!("Turbidity: {} NTU", reading.turbidity);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Which transport this is.
    fn connection_type(&self) -> ConnectionType;

    /// Human-readable description of the target (for logs and status lines).
    fn describe(&self) -> String;

    /// Whether the bound configuration identifies a device.
    ///
    /// A transport that is not configured never produces a reading.
    fn is_configured(&self) -> bool;

    /// Check that the device answers with a usable reading.
    ///
    /// Returns `Ok(false)` when the device could not be reached for an
    /// ordinary reason (or the user dismissed a device picker); errors are
    /// reserved for failures the user must act on.
    async fn test_connection(&self) -> Result<bool>;

    /// Obtain the current reading, connecting first if needed.
    async fn read(&self) -> Result<SensorReading>;

    /// Release any connection held by the transport.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Subscribe to pushed readings and link drops.
    ///
    /// `None` (the default) means the transport must be polled with
    /// [`DeviceTransport::read`]. A push transport counts as connected once
    /// [`DeviceTransport::test_connection`] succeeds; subscribe before
    /// calling it so no notification is missed.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        None
    }
}
