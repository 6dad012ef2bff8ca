//! Conversion of raw cumulative counters into point-in-time rates
//!
//! CPU percentage is derived from the delta of two CPU counter reads.
//! Memory percentage is relative to the reported limit. Network and block
//! I/O values are point totals summed across interfaces and devices.

use crate::models::{
    BlockOp, ContainerUsage, CounterSnapshot, CpuCounters, CpuUsage, MetricSample, SampleOwner,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time rates and totals for one unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub cpu_percent: f64,
    pub cpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub network_rx_packets: u64,
    pub network_tx_packets: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

/// CPU usage percentage between two counter reads
///
/// Returns 0.0 unless both the container and the system delta are positive.
pub fn cpu_percent(previous: &CpuCounters, current: &CpuCounters) -> f64 {
    let cpu_delta = current.container_cpu_time as i128 - previous.container_cpu_time as i128;
    let system_delta = current.system_cpu_time as i128 - previous.system_cpu_time as i128;

    if system_delta > 0 && cpu_delta > 0 {
        let cpus = current.online_cpus.max(1) as f64;
        (cpu_delta as f64 / system_delta as f64) * cpus * 100.0
    } else {
        0.0
    }
}

/// Memory usage as a percentage of the limit, 0.0 without a limit
pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit > 0 {
        (usage as f64 / limit as f64) * 100.0
    } else {
        0.0
    }
}

/// Normalize a snapshot against the previous CPU read it carries
pub fn normalize(snapshot: &CounterSnapshot) -> RateRecord {
    normalize_counters(snapshot.previous_cpu.as_ref(), snapshot)
}

/// Normalize two consecutive snapshots of the same unit
pub fn normalize_pair(previous: Option<&CounterSnapshot>, current: &CounterSnapshot) -> RateRecord {
    normalize_counters(previous.map(|p| &p.cpu), current)
}

fn normalize_counters(previous_cpu: Option<&CpuCounters>, current: &CounterSnapshot) -> RateRecord {
    let mut record = totals(current);

    // First sample: no delta is available, so both percentages stay at zero.
    if let Some(previous) = previous_cpu {
        record.cpu_percent = cpu_percent(previous, &current.cpu);
        record.memory_percent = memory_percent(current.memory_usage, current.memory_limit);
    }

    record
}

fn totals(snapshot: &CounterSnapshot) -> RateRecord {
    let mut record = RateRecord {
        cpu_total_usage: snapshot.cpu.container_cpu_time,
        cpu_system_usage: snapshot.cpu.system_cpu_time,
        memory_usage: snapshot.memory_usage,
        memory_limit: snapshot.memory_limit,
        ..Default::default()
    };

    for iface in snapshot.networks.values() {
        record.network_rx_bytes = record.network_rx_bytes.saturating_add(iface.rx_bytes);
        record.network_tx_bytes = record.network_tx_bytes.saturating_add(iface.tx_bytes);
        record.network_rx_packets = record.network_rx_packets.saturating_add(iface.rx_packets);
        record.network_tx_packets = record.network_tx_packets.saturating_add(iface.tx_packets);
    }

    for entry in &snapshot.block_io {
        match entry.op {
            BlockOp::Read => {
                record.block_read_bytes = record.block_read_bytes.saturating_add(entry.value)
            }
            BlockOp::Write => {
                record.block_write_bytes = record.block_write_bytes.saturating_add(entry.value)
            }
            BlockOp::Other => {}
        }
    }

    record
}

impl RateRecord {
    /// Build the persisted sample for this record
    pub fn into_sample(self, owner: SampleOwner, timestamp: DateTime<Utc>) -> MetricSample {
        MetricSample {
            owner,
            timestamp,
            cpu: CpuUsage::Percent(self.cpu_percent),
            cpu_total_usage: self.cpu_total_usage,
            cpu_system_usage: self.cpu_system_usage,
            memory_usage_bytes: self.memory_usage,
            memory_limit_bytes: self.memory_limit,
            memory_percent: self.memory_percent,
            network_rx_bytes: self.network_rx_bytes,
            network_tx_bytes: self.network_tx_bytes,
            network_rx_packets: self.network_rx_packets,
            network_tx_packets: self.network_tx_packets,
            block_read_bytes: self.block_read_bytes,
            block_write_bytes: self.block_write_bytes,
        }
    }
}

/// Sample for a pod container whose usage the runtime already rated
pub fn usage_sample(
    owner: SampleOwner,
    usage: &ContainerUsage,
    timestamp: DateTime<Utc>,
) -> MetricSample {
    MetricSample {
        owner,
        timestamp,
        cpu: CpuUsage::Millicores(usage.cpu_millicores),
        cpu_total_usage: 0,
        cpu_system_usage: 0,
        memory_usage_bytes: usage.memory_bytes,
        memory_limit_bytes: 0,
        memory_percent: 0.0,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
        network_rx_packets: 0,
        network_tx_packets: 0,
        block_read_bytes: 0,
        block_write_bytes: 0,
    }
}
