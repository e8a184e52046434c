//! Infrastructure: event storage, command dispatch, read models and the
//! orchestration that spans more than one aggregate.

pub mod catalogue;
pub mod command_dispatcher;
pub mod event_store;
pub mod fulfillment;
pub mod projections;
pub mod query;
pub mod read_model;
pub mod streams;

#[cfg(test)]
mod integration_tests;
