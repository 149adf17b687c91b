//! Simulation outcomes and their text rendering

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Whether an operation was generated to be accepted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedResult {
    ShouldSucceed,
    ShouldFail,
}

/// Properties checked while the simulation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    /// A live view equals a fresh snapshot of its tenant once writes settle
    ViewMatchesSnapshot,
    /// No view holds a record of another tenant
    NoForeignRecords,
    /// No note or telemetry record outlives its profile
    NoOrphanRecords,
    /// A rejected write changed nothing in any tenant
    RejectedWriteLeftStoreUnchanged,
    /// Sessions only close when their owner closes them
    SessionStayedOpen,
}

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub check: InvariantCheck,
    pub details: String,
}

#[derive(Debug, Clone)]
pub enum Violation {
    /// An operation was accepted when it should have been rejected, or the
    /// other way round
    UnexpectedOutcome {
        operation_index: u64,
        operation: String,
        expected: ExpectedResult,
        actual: Result<(), String>,
    },
    Invariant(InvariantViolation),
}

impl Violation {
    pub(crate) fn invariant(check: InvariantCheck, details: impl Into<String>) -> Self {
        Self::Invariant(InvariantViolation {
            check,
            details: details.into(),
        })
    }
}

/// Counters collected per run
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    pub total_operations: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub disconnects: u64,
    pub operations_by_type: BTreeMap<&'static str, u64>,
}

impl OperationStats {
    pub fn record(&mut self, kind: &'static str, accepted: bool) {
        self.total_operations += 1;
        *self.operations_by_type.entry(kind).or_insert(0) += 1;
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Final report of `simulate`
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    pub seed: u64,
    pub tenants: usize,
    pub sessions: usize,
    pub stats: OperationStats,
    pub violations: Vec<Violation>,
    pub final_profile_count: usize,
    pub elapsed: Duration,
}

impl SimulatorReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        let _ = writeln!(report, "=== kinsync Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Tenants: {}", self.tenants);
        let _ = writeln!(report, "Sessions: {}", self.sessions);
        let _ = writeln!(report, "Total Operations: {}", self.stats.total_operations);
        let _ = writeln!(report, "Accepted: {}", self.stats.accepted);
        let _ = writeln!(report, "Rejected: {}", self.stats.rejected);
        let _ = writeln!(report, "Disconnects: {}", self.stats.disconnects);
        let _ = writeln!(report, "Final Profiles: {}", self.final_profile_count);
        let _ = writeln!(report, "Elapsed: {:.2?}", self.elapsed);

        if !self.stats.operations_by_type.is_empty() {
            let _ = writeln!(report, "\n=== Operations ===");
            for (kind, count) in &self.stats.operations_by_type {
                let _ = writeln!(report, "{kind}: {count}");
            }
        }

        if !self.violations.is_empty() {
            let _ = writeln!(report, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Final report of `stress`
#[derive(Debug, Clone)]
pub struct StressReport {
    pub tenants: usize,
    pub sessions: usize,
    pub operations: u64,
    pub elapsed: Duration,
    pub violations: Vec<Violation>,
}

impl StressReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Committed operations per second
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.operations as f64 / secs
        }
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "Stress Test Report:");
        let _ = writeln!(report, "  Tenants: {}", self.tenants);
        let _ = writeln!(report, "  Sessions: {}", self.sessions);
        let _ = writeln!(report, "  Operations: {}", self.operations);
        let _ = writeln!(report, "  Elapsed: {:.2?}", self.elapsed);
        let _ = writeln!(report, "  Throughput: {:.0} ops/s", self.throughput());
        let _ = writeln!(report, "  Violations: {}", self.violations.len());
        for v in &self.violations {
            let _ = writeln!(report, "    {v:?}");
        }
        let _ = writeln!(report, "  Success: {}", self.passed());
        report
    }
}
