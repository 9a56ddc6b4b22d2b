extern crate vergen;

use vergen::{generate_cargo_keys, ConstantsFlags};

fn main() {
    // Stamp the binary with version, commit and build time so that log
    // records and --version output identify exactly what is running.
    generate_cargo_keys(
        ConstantsFlags::SHA_SHORT
            | ConstantsFlags::SEMVER_FROM_CARGO_PKG
            | ConstantsFlags::BUILD_TIMESTAMP,
    )
    .expect("unable to generate version keys");
}
