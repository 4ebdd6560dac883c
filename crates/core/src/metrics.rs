//! Ambient metrics: `IntCounterVec`/`HistogramVec` registered against a
//! `prometheus::Registry`, instantiated rather than built from process-wide
//! statics, so the metrics sink is a parameter and tests can inject a fresh,
//! silent `Registry` instead of sharing one process-wide default.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// One registry plus every counter/histogram/gauge the fabric emits. Held
/// behind an `Arc` and shared by every RoomCore actor and the AuthFront
/// instance in a process.
pub struct Metrics {
    registry: Registry,
    pub turns_committed: IntCounterVec,
    pub turn_duration: HistogramVec,
    pub mutations_applied: IntCounterVec,
    pub mutations_skipped: IntCounterVec,
    pub mutations_failed: IntCounterVec,
    pub active_rooms: IntGauge,
    pub active_clients: IntGauge,
    pub pokes_sent: IntCounterVec,
    pub invalidation_fanout_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let turns_committed = IntCounterVec::new(
            Opts::new("roomsync_turns_committed_total", "Number of turns committed, by room"),
            &["room_id"],
        )
        .expect("static metric definition");
        let turn_duration = HistogramVec::new(
            HistogramOpts::new("roomsync_turn_duration_seconds", "Wall time spent running one turn"),
            &["room_id"],
        )
        .expect("static metric definition");
        let mutations_applied = IntCounterVec::new(
            Opts::new("roomsync_mutations_applied_total", "Mutations that ran a mutator and staged writes"),
            &["room_id"],
        )
        .expect("static metric definition");
        let mutations_skipped = IntCounterVec::new(
            Opts::new(
                "roomsync_mutations_skipped_total",
                "Mutations dropped as idempotent replay or unresolved mutator name",
            ),
            &["room_id", "reason"],
        )
        .expect("static metric definition");
        let mutations_failed = IntCounterVec::new(
            Opts::new("roomsync_mutations_failed_total", "Mutations whose mutator returned an error and were rolled back"),
            &["room_id"],
        )
        .expect("static metric definition");
        let active_rooms = IntGauge::new("roomsync_active_rooms", "Number of RoomCore actors currently running").expect("static metric definition");
        let active_clients =
            IntGauge::new("roomsync_active_clients", "Number of connected clients across all rooms").expect("static metric definition");
        let pokes_sent = IntCounterVec::new(Opts::new("roomsync_pokes_sent_total", "Poke frames sent to clients"), &["room_id"])
            .expect("static metric definition");
        let invalidation_fanout_duration = HistogramVec::new(
            HistogramOpts::new(
                "roomsync_invalidation_fanout_duration_seconds",
                "Wall time for one AuthFront invalidate* call to fan out and await every affected room",
            ),
            &["kind"],
        )
        .expect("static metric definition");

        for collector in [
            Box::new(turns_committed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(turn_duration.clone()),
            Box::new(mutations_applied.clone()),
            Box::new(mutations_skipped.clone()),
            Box::new(mutations_failed.clone()),
            Box::new(active_rooms.clone()),
            Box::new(active_clients.clone()),
            Box::new(pokes_sent.clone()),
            Box::new(invalidation_fanout_duration.clone()),
        ] {
            registry.register(collector).expect("metric names are unique and registered once");
        }

        Metrics {
            registry,
            turns_committed,
            turn_duration,
            mutations_applied,
            mutations_skipped,
            mutations_failed,
            active_rooms,
            active_clients,
            pokes_sent,
            invalidation_fanout_duration,
        }
    }

    /// Renders the current state of every registered collector as Prometheus
    /// text exposition, for `GET /metrics`.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        TextEncoder::new().encode_to_string(&families).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.turns_committed.with_label_values(&["r1"]).inc();
        let text = metrics.render();
        assert!(text.contains("roomsync_turns_committed_total"));
    }

    #[test]
    fn fresh_instances_do_not_share_state() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.active_rooms.set(3);
        assert_eq!(b.active_rooms.get(), 0);
    }
}
