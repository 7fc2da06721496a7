//! Frame sources backed by libpcap.
//!
//! Opens either a live capture on a network interface or a saved pcap file,
//! with optional BPF filtering, behind one handle type.

pub mod engine;
