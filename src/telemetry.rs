//! Host telemetry sampling.
//!
//! Sampling is best-effort: a sample never fails, it degrades to zero
//! values when the platform reports nothing.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{Networks, System};
use tokio::time::MissedTickBehavior;

/// Point-in-time reading of host CPU, memory and cumulative network
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// CPU utilization percentage across all cores.
    pub cpu: f32,
    /// RAM utilization percentage.
    pub ram: f32,
    /// Cumulative bytes sent over all network interfaces.
    pub net_sent: u64,
    /// Cumulative bytes received over all network interfaces.
    pub net_recv: u64,
}

/// Producer of host resource snapshots. Each sample is independent; no
/// history is retained beyond what CPU delta measurement requires.
pub struct TelemetrySampler {
    system: System,
    networks: Networks,
}

impl TelemetrySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Read current host stats. CPU utilization is measured against the
    /// previous call, so the first sample reports zero.
    pub fn sample(&mut self) -> TelemetrySnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let ram = match self.system.total_memory() {
            0 => 0.0,
            total => self.system.used_memory() as f32 / total as f32 * 100.0,
        };
        let (net_sent, net_recv) = self
            .networks
            .iter()
            .fold((0, 0), |(sent, recv), (_, data)| {
                (sent + data.total_transmitted(), recv + data.total_received())
            });

        TelemetrySnapshot {
            cpu: self.system.global_cpu_usage(),
            ram,
            net_sent,
            net_recv,
        }
    }

    /// Lazy, infinite sequence of snapshots spaced `interval` apart. The
    /// first snapshot is produced immediately. Restart by recreating the
    /// sampler; stop by dropping the stream.
    pub fn stream(self, interval: Duration) -> impl Stream<Item = TelemetrySnapshot> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        futures::stream::unfold((self, ticker), |(mut sampler, mut ticker)| async move {
            ticker.tick().await;
            let snapshot = sampler.sample();
            Some((snapshot, (sampler, ticker)))
        })
    }
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        Self::new()
    }
}
