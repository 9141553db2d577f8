fn main() {
    // Recompile when the compile-time endpoint override changes.
    // Without this, option_env!() values get cached and won't update.
    println!("cargo:rerun-if-env-changed=ENGAGE_ENDPOINT_BASE");
}
