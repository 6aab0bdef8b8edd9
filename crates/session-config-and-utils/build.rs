fn main() {
    // Recompile when the compile-time endpoint defaults change.
    // Without this, option_env!() values get cached and won't update.
    println!("cargo:rerun-if-env-changed=RECIPE_API_URL");
    println!("cargo:rerun-if-env-changed=RECIPE_REALTIME_URL");
}
