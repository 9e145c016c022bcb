//! Database record models matching table schemas.
//!
//! Models derive `sqlx::FromRow` and stay separate from the API models in
//! [`crate::api::models`] so storage and wire representations can evolve independently.

pub mod users;
