//! The heralded-entanglement link: midpoint station, physical layer (MHP)
//! and link layer (EGP).
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`midpoint`] | [`MidpointStation`], [`Side`] |
//! | [`mhp`] | [`Mhp`], [`HeraldResult`], [`QuantumMemory`] |
//! | [`egp`] | [`Egp`], [`EgpConfig`] |
//! | [`request`] | request types and the [`RequestSync`] codec |

pub mod egp;
pub mod mhp;
pub mod midpoint;
pub mod request;

pub use egp::{Egp, EgpConfig, EgpState, EgpStats};
pub use mhp::{HeraldResult, Mhp, MhpState, MhpStats, QuantumMemory};
pub use midpoint::{MidpointStation, MidpointStats, Side};
pub use request::{
    CreateRequest, CreationId, LinkRequest, OkResponse, QueuedRequest, RequestExtras, RequestKind, RequestSync,
};
