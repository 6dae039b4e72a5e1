fn main() {
    // Only the Node.js addon needs the napi link setup
    if std::env::var_os("CARGO_FEATURE_NODE").is_none() {
        return;
    }

    // Enable pkg-config for cross-compilation (needed for pcsc-sys)
    std::env::set_var("PKG_CONFIG_ALLOW_CROSS", "1");

    napi_build::setup();
}
