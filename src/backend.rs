//! Quantum backend interface and two supplied implementations.
//!
//! The link protocols never look at quantum states. They create pairs,
//! ask for a joint measurement and apply corrections through
//! [`QuantumBackend`], and only ever see the resulting [`AttemptOutcome`].

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ── Outcomes and handles ──────────────────────────────────────────────

/// Result of one heralding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    EntangledPsiPlus,
    EntangledPsiMinus,
    Product,
    Timeout,
}

impl AttemptOutcome {
    /// Only the two Bell states count towards a request.
    pub fn is_entangled(self) -> bool {
        matches!(self, AttemptOutcome::EntangledPsiPlus | AttemptOutcome::EntangledPsiMinus)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptOutcome::EntangledPsiPlus => "psi+",
            AttemptOutcome::EntangledPsiMinus => "psi-",
            AttemptOutcome::Product => "product",
            AttemptOutcome::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Opaque reference to a qubit owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QubitHandle(u64);

impl QubitHandle {
    pub fn new(raw: u64) -> Self {
        QubitHandle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for QubitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub pairs_created: u64,
    pub joint_measurements: u64,
    pub corrections: u64,
    pub discarded: u64,
}

// ── QuantumBackend ────────────────────────────────────────────────────

/// Qubit storage and classical outcome generation.
pub trait QuantumBackend {
    /// Create an entangled emitter/photon pair. The first handle stays in
    /// local memory, the second is transmitted.
    fn new_pair(&mut self) -> (QubitHandle, QubitHandle);

    /// Jointly measure two transmitted qubits at the midpoint.
    fn measure_joint(&mut self, a: QubitHandle, b: QubitHandle) -> AttemptOutcome;

    /// Rotate a stored qubit so that `outcome` maps to the reference Bell
    /// state.
    fn apply_correction(&mut self, qubit: QubitHandle, outcome: AttemptOutcome);

    /// Release a qubit that will not be used again.
    fn discard(&mut self, _qubit: QubitHandle) {}

    fn stats(&self) -> BackendStats;
}

// ── SampledBackend ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QubitRecord {
    /// Created and not yet measured, corrected or discarded.
    Fresh,
    Measured(AttemptOutcome),
    Corrected(AttemptOutcome),
}

/// Samples outcomes from a seeded RNG.
///
/// A joint measurement succeeds with `success_probability`; a success is
/// Ψ+ or Ψ− with equal odds, a failure is a product state.
pub struct SampledBackend {
    rng: StdRng,
    success_probability: f64,
    next_handle: u64,
    qubits: BTreeMap<QubitHandle, QubitRecord>,
    stats: BackendStats,
}

impl SampledBackend {
    pub fn new(seed: u64, success_probability: f64) -> Self {
        SampledBackend {
            rng: StdRng::seed_from_u64(seed),
            success_probability: if success_probability.is_nan() {
                0.0
            } else {
                success_probability.clamp(0.0, 1.0)
            },
            next_handle: 0,
            qubits: BTreeMap::new(),
            stats: BackendStats::default(),
        }
    }

    pub fn record(&self, qubit: QubitHandle) -> Option<QubitRecord> {
        self.qubits.get(&qubit).copied()
    }

    /// Qubits currently held (not discarded).
    pub fn live_qubits(&self) -> usize {
        self.qubits.len()
    }

    fn mint(&mut self) -> QubitHandle {
        let handle = QubitHandle(self.next_handle);
        self.next_handle += 1;
        self.qubits.insert(handle, QubitRecord::Fresh);
        handle
    }
}

impl QuantumBackend for SampledBackend {
    fn new_pair(&mut self) -> (QubitHandle, QubitHandle) {
        self.stats.pairs_created += 1;
        (self.mint(), self.mint())
    }

    fn measure_joint(&mut self, a: QubitHandle, b: QubitHandle) -> AttemptOutcome {
        self.stats.joint_measurements += 1;
        let outcome = if self.rng.gen_bool(self.success_probability) {
            if self.rng.gen_bool(0.5) {
                AttemptOutcome::EntangledPsiPlus
            } else {
                AttemptOutcome::EntangledPsiMinus
            }
        } else {
            AttemptOutcome::Product
        };
        // Measured photons are gone.
        self.qubits.remove(&a);
        self.qubits.remove(&b);
        outcome
    }

    fn apply_correction(&mut self, qubit: QubitHandle, outcome: AttemptOutcome) {
        self.stats.corrections += 1;
        self.qubits.insert(qubit, QubitRecord::Corrected(outcome));
    }

    fn discard(&mut self, qubit: QubitHandle) {
        if self.qubits.remove(&qubit).is_some() {
            self.stats.discarded += 1;
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

// ── ScriptedBackend ───────────────────────────────────────────────────

/// Replays a fixed sequence of joint-measurement outcomes, then returns
/// `fallback` forever. Used for reproducible scenarios.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    script: VecDeque<AttemptOutcome>,
    fallback: AttemptOutcome,
    next_handle: u64,
    /// Qubits passed to `apply_correction`, in call order.
    pub corrected: Vec<(QubitHandle, AttemptOutcome)>,
    stats: BackendStats,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = AttemptOutcome>) -> Self {
        ScriptedBackend {
            script: script.into_iter().collect(),
            fallback: AttemptOutcome::Product,
            next_handle: 0,
            corrected: Vec::new(),
            stats: BackendStats::default(),
        }
    }

    /// A backend that returns `outcome` for every measurement.
    pub fn always(outcome: AttemptOutcome) -> Self {
        ScriptedBackend::new(VecDeque::new()).with_fallback(outcome)
    }

    pub fn with_fallback(mut self, fallback: AttemptOutcome) -> Self {
        self.fallback = fallback;
        self
    }

    /// Outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl QuantumBackend for ScriptedBackend {
    fn new_pair(&mut self) -> (QubitHandle, QubitHandle) {
        self.stats.pairs_created += 1;
        let local = QubitHandle(self.next_handle);
        let photon = QubitHandle(self.next_handle + 1);
        self.next_handle += 2;
        (local, photon)
    }

    fn measure_joint(&mut self, _a: QubitHandle, _b: QubitHandle) -> AttemptOutcome {
        self.stats.joint_measurements += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }

    fn apply_correction(&mut self, qubit: QubitHandle, outcome: AttemptOutcome) {
        self.stats.corrections += 1;
        self.corrected.push((qubit, outcome));
    }

    fn discard(&mut self, _qubit: QubitHandle) {
        self.stats.discarded += 1;
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}
