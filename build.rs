//! Build script for deskwarden
//!
//! Embeds the Windows application manifest (per-monitor DPI awareness for the
//! tray menu, asInvoker execution level) and links the system libraries the
//! platform adapters call into.

fn main() {
    println!("cargo:rerun-if-changed=resources/deskwarden.rc");
    println!("cargo:rerun-if-changed=resources/deskwarden.manifest");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }

    embed_resource::compile("resources/deskwarden.rc", embed_resource::NONE);

    for lib in ["ole32", "user32", "iphlpapi", "ntdll"] {
        println!("cargo:rustc-link-lib={lib}");
    }
}
