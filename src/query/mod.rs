//! SQL shaping for the PostgreSQL record store.
//!
//! Listing, count and audit statements are built with SeaQuery; writes are plain
//! parameterised statements in [`crate::store::postgres`].

pub mod records;

pub(crate) mod value_conversion;

pub use records::{
    count_pending, join_condition, pending_predicate, select_records, select_signatures,
    sum_amount,
};
