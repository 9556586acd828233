//! Probe bitrate estimator (§4.14): aggregates feedback for tagged probe
//! packets into per-cluster send/receive rate samples. Grounded on
//! `congestion_controller/goog_cc/probe_bitrate_estimator.cpp`.

use std::collections::HashMap;

use shared::time::{DataRate, TimeDelta, Timestamp};

use crate::network_types::PacketResult;

const MIN_RECEIVED_PROBES_RATIO: f64 = 0.8;
const MIN_RECEIVED_BYTES_RATIO: f64 = 0.8;
const MAX_VALID_RATIO: f64 = 2.0;
const MIN_RATIO_FOR_UNSATURATED_LINK: f64 = 0.9;
const TARGET_UTILIZATION_FRACTION: f64 = 0.95;
const MAX_CLUSTER_HISTORY: TimeDelta = TimeDelta::from_micros(1_000_000);
const MAX_PROBE_INTERVAL: TimeDelta = TimeDelta::from_micros(1_000_000);

#[derive(Debug, Clone, Copy)]
struct AggregatedCluster {
    num_probes: usize,
    first_send_time: Timestamp,
    last_send_time: Timestamp,
    first_recv_time: Timestamp,
    last_recv_time: Timestamp,
    size: usize,
    first_recv_size: usize,
    last_send_size: usize,
}

impl AggregatedCluster {
    fn empty() -> Self {
        Self {
            num_probes: 0,
            first_send_time: Timestamp::plus_infinity(),
            last_send_time: Timestamp::minus_infinity(),
            first_recv_time: Timestamp::plus_infinity(),
            last_recv_time: Timestamp::minus_infinity(),
            size: 0,
            first_recv_size: 0,
            last_send_size: 0,
        }
    }
}

#[derive(Default)]
pub struct ProbeBitrateEstimator {
    clusters: HashMap<i32, AggregatedCluster>,
    estimated_bitrate: Option<DataRate>,
}

impl ProbeBitrateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet belonging to a probe cluster
    /// (`packet.sent_packet.pacing_info.is_probe()` must hold). Returns the
    /// updated bitrate estimate if the cluster now has enough samples.
    pub fn handle_probe_and_estimate_bitrate(&mut self, packet: &PacketResult) -> Option<DataRate> {
        let pacing = packet.sent_packet.pacing_info;
        if !pacing.is_probe() || pacing.probe_cluster_min_bytes == 0 {
            return None;
        }
        let cluster_id = pacing.probe_cluster_id;
        self.erase_old_clusters(packet.recv_time);

        let cluster = self.clusters.entry(cluster_id).or_insert_with(AggregatedCluster::empty);
        let send_time = packet.sent_packet.send_time;
        let size = packet.sent_packet.size;

        if send_time < cluster.first_send_time {
            cluster.first_send_time = send_time;
        }
        if send_time > cluster.last_send_time {
            cluster.last_send_time = send_time;
            cluster.last_send_size = size;
        }
        if packet.recv_time < cluster.first_recv_time {
            cluster.first_recv_time = packet.recv_time;
            cluster.first_recv_size = size;
        }
        if packet.recv_time > cluster.last_recv_time {
            cluster.last_recv_time = packet.recv_time;
        }
        cluster.size += size;
        cluster.num_probes += 1;

        let min_probes = (pacing.probe_cluster_min_probes as f64 * MIN_RECEIVED_PROBES_RATIO) as usize;
        let min_size = (pacing.probe_cluster_min_bytes as f64 * MIN_RECEIVED_BYTES_RATIO) as usize;
        if cluster.num_probes < min_probes || cluster.size < min_size {
            return None;
        }

        let send_interval = cluster.last_send_time - cluster.first_send_time;
        let recv_interval = cluster.last_recv_time - cluster.first_recv_time;
        if send_interval <= TimeDelta::zero()
            || send_interval > MAX_PROBE_INTERVAL
            || recv_interval <= TimeDelta::zero()
            || recv_interval > MAX_PROBE_INTERVAL
        {
            log::debug!(
                "probe cluster {cluster_id} rejected: invalid send/receive interval"
            );
            return None;
        }

        let send_size = cluster.size.saturating_sub(cluster.last_send_size);
        let send_bitrate =
            DataRate::bytes_per_sec(send_size as i64 * 1000 / send_interval.ms().max(1));
        let recv_size = cluster.size.saturating_sub(cluster.first_recv_size);
        let recv_bitrate =
            DataRate::bytes_per_sec(recv_size as i64 * 1000 / recv_interval.ms().max(1));

        let ratio = recv_bitrate.bps_f64() / send_bitrate.bps_f64().max(1.0);
        if ratio > MAX_VALID_RATIO {
            log::debug!("probe cluster {cluster_id} rejected: receive/send ratio {ratio} too high");
            return None;
        }

        let mut result = if send_bitrate < recv_bitrate { send_bitrate } else { recv_bitrate };
        if recv_bitrate.bps_f64() < MIN_RATIO_FOR_UNSATURATED_LINK * send_bitrate.bps_f64() {
            result = DataRate::bits_per_sec((TARGET_UTILIZATION_FRACTION * recv_bitrate.bps_f64()) as i64);
        }
        self.estimated_bitrate = Some(result);
        Some(result)
    }

    pub fn fetch_and_reset_last_estimate(&mut self) -> Option<DataRate> {
        self.estimated_bitrate.take()
    }

    fn erase_old_clusters(&mut self, now: Timestamp) {
        self.clusters
            .retain(|_, cluster| cluster.last_recv_time + MAX_CLUSTER_HISTORY >= now);
    }
}
