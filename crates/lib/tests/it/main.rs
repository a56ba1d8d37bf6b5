/*! Integration tests for Sprig.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - address: Ordering properties of generated addresses
 * - index: Randomized operation sequences against the ordered index
 * - codec: Wire form of changes and batches
 * - config: Loading replica configuration from JSON files
 * - sync: Multi-replica scenarios (permissions, ownership, convergence)
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sprig=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod config;
mod helpers;
mod index;
mod sync;
