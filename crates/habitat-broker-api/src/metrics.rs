//! Request counters in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker operations counted per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Catalog,
    Provision,
    Update,
    Deprovision,
    LastOperation,
    Bind,
    Unbind,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Catalog,
        Operation::Provision,
        Operation::Update,
        Operation::Deprovision,
        Operation::LastOperation,
        Operation::Bind,
        Operation::Unbind,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Catalog => "catalog",
            Operation::Provision => "provision",
            Operation::Update => "update",
            Operation::Deprovision => "deprovision",
            Operation::LastOperation => "last_operation",
            Operation::Bind => "bind",
            Operation::Unbind => "unbind",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Counters {
    ok: AtomicU64,
    failed: AtomicU64,
}

#[derive(Default)]
pub struct BrokerMetrics {
    counters: [Counters; Operation::ALL.len()],
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: Operation, ok: bool) {
        let c = &self.counters[op.index()];
        if ok {
            c.ok.fetch_add(1, Ordering::Relaxed);
        } else {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(succeeded, failed)` for `op`.
    pub fn get(&self, op: Operation) -> (u64, u64) {
        let c = &self.counters[op.index()];
        (c.ok.load(Ordering::Relaxed), c.failed.load(Ordering::Relaxed))
    }

    /// Render counters plus the registered-instance gauge.
    pub fn render_prometheus(&self, registered_instances: usize) -> String {
        let mut out = String::new();

        out.push_str("# HELP habitat_broker_requests_total Broker operations handled, by outcome.\n");
        out.push_str("# TYPE habitat_broker_requests_total counter\n");
        for op in Operation::ALL {
            let (ok, failed) = self.get(op);
            let _ = writeln!(
                out,
                "habitat_broker_requests_total{{operation=\"{}\",outcome=\"success\"}} {ok}",
                op.as_str()
            );
            let _ = writeln!(
                out,
                "habitat_broker_requests_total{{operation=\"{}\",outcome=\"error\"}} {failed}",
                op.as_str()
            );
        }

        out.push_str("# HELP habitat_broker_registered_instances Instances recorded in the registry.\n");
        out.push_str("# TYPE habitat_broker_registered_instances gauge\n");
        let _ = writeln!(out, "habitat_broker_registered_instances {registered_instances}");

        out
    }
}
