//! Opens a pcap handle, live or offline, and yields raw frames.

use crate::config::CaptureConfig;
use pcap::{Activated, Capture, Device};
use std::fmt;
use std::path::Path;

/// Errors from the capture engine.
#[derive(Debug)]
pub enum CaptureError {
    /// Failed to find a suitable network device.
    NoDevice(String),
    /// pcap error.
    Pcap(pcap::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoDevice(msg) => write!(f, "no capture device: {}", msg),
            CaptureError::Pcap(e) => write!(f, "pcap error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        CaptureError::Pcap(e)
    }
}

/// Live or file-backed capture; both read through the same calls.
pub type FrameSource = Capture<dyn Activated>;

/// List all available network interfaces.
pub fn list_interfaces() -> Result<Vec<Device>, CaptureError> {
    Device::list().map_err(CaptureError::Pcap)
}

/// Open the source named by `config`: the pcap file if `read_file` is set,
/// otherwise the configured (or default) interface.
pub fn open(config: &CaptureConfig) -> Result<FrameSource, CaptureError> {
    let mut cap = match &config.read_file {
        Some(path) => open_offline(path)?,
        None => open_live(config)?,
    };

    if let Some(filter) = &config.filter {
        cap.filter(filter, true)?;
    }
    Ok(cap)
}

fn open_offline(path: &Path) -> Result<FrameSource, CaptureError> {
    let cap = Capture::from_file(path)?;
    tracing::info!(file = %path.display(), "reading capture file");
    Ok(cap.into())
}

fn open_live(config: &CaptureConfig) -> Result<FrameSource, CaptureError> {
    let device = match &config.interface {
        Some(name) => Device::list()?
            .into_iter()
            .find(|d| d.name == *name)
            .ok_or_else(|| CaptureError::NoDevice(format!("interface '{}' not found", name)))?,
        None => Device::lookup()?
            .ok_or_else(|| CaptureError::NoDevice("no default device found".into()))?,
    };

    let device_name = device.name.clone();

    let cap = Capture::from_device(device)?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(config.timeout_ms)
        .open()?;

    tracing::info!(
        interface = %device_name,
        promiscuous = config.promiscuous,
        snaplen = config.snaplen,
        filter = config.filter.as_deref().unwrap_or("none"),
        "capture started"
    );

    Ok(cap.into())
}
