//! Build script - hands the esp-hal linker script to the linker when the
//! firmware binary is built. Host builds (library + tests) need nothing.

use std::env;

fn main() {
    // Only the embedded binary links against linkall.x
    if env::var_os("CARGO_FEATURE_EMBEDDED").is_some()
        && env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none")
    {
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
