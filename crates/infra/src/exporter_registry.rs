//! Device and exporter configuration lookup.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use stgcmt_archive::ExporterDescriptor;
use stgcmt_core::{DeviceName, ExporterId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceName),

    #[error("unknown exporter '{exporter_id}' on device '{device}'")]
    UnknownExporter {
        device: DeviceName,
        exporter_id: ExporterId,
    },
}

/// Read-only source of exporter descriptors, keyed by device.
pub trait ExporterRegistry: Send + Sync {
    fn resolve_exporter(
        &self,
        device: &DeviceName,
        exporter_id: &ExporterId,
    ) -> Result<ExporterDescriptor, RegistryError>;
}

impl<S> ExporterRegistry for Arc<S>
where
    S: ExporterRegistry + ?Sized,
{
    fn resolve_exporter(
        &self,
        device: &DeviceName,
        exporter_id: &ExporterId,
    ) -> Result<ExporterDescriptor, RegistryError> {
        (**self).resolve_exporter(device, exporter_id)
    }
}

/// Static registry built at startup, from code or from a configuration file.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceName, HashMap<ExporterId, ExporterDescriptor>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: DeviceName) -> Self {
        self.devices.entry(device).or_default();
        self
    }

    pub fn with_exporter(mut self, device: DeviceName, exporter: ExporterDescriptor) -> Self {
        self.register(device, exporter);
        self
    }

    /// Add or replace an exporter; registers the device if needed.
    pub fn register(&mut self, device: DeviceName, exporter: ExporterDescriptor) {
        self.devices
            .entry(device)
            .or_default()
            .insert(exporter.exporter_id().clone(), exporter);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl ExporterRegistry for DeviceRegistry {
    fn resolve_exporter(
        &self,
        device: &DeviceName,
        exporter_id: &ExporterId,
    ) -> Result<ExporterDescriptor, RegistryError> {
        let exporters = self
            .devices
            .get(device)
            .ok_or_else(|| RegistryError::UnknownDevice(device.clone()))?;

        exporters
            .get(exporter_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownExporter {
                device: device.clone(),
                exporter_id: exporter_id.clone(),
            })
    }
}
