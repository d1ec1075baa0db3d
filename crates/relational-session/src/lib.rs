//! Hydration, identity tracking and the mapper surface.
//!
//! - [`Hydrator`] splits joined rows into linked entities.
//! - [`Tracker`] is the identity map and unit of work; [`Tracker::flush`]
//!   writes pending changes in one transaction.
//! - [`Mapper`] ties a connection, a [`Style`](relational_core::Style) and
//!   an [`EntityRegistry`](relational_core::EntityRegistry) together, and
//!   [`Finder`] is its chainable collection builder.
//! - [`Db`] runs hand-built statements without mapping.

pub mod config;
pub mod db;
pub mod flush;
pub mod hydrator;
pub mod mapper;
pub mod tracker;

#[cfg(test)]
mod mock;

pub use config::MapperConfig;
pub use db::{Db, Query};
pub use flush::{FlushPlan, FlushResult, PendingOp};
pub use hydrator::{Hydrated, HydratedEntry, Hydrator, IdentityLookup};
pub use mapper::{Finder, Mapper};
pub use tracker::Tracker;
