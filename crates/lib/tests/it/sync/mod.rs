//! Multi-replica scenarios, run entirely in process.

mod convergence;
mod permissions;
