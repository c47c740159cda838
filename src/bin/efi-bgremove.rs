//! EFI Background Removal CLI Tool
//!
//! Removes the background of one image with the U²-Net model, downloading
//! the model into the local cache on first use.

#[cfg(feature = "cli")]
use efi_bgremove::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
