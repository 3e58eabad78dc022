//! Shared helpers for the bindex command-line tools.

use anyhow::{ensure, Result};

/// Initializes logging from `RUST_LOG`, defaulting to warnings only.
pub fn init_logger() {
    flexi_logger::Logger::with_env_or_str("warn")
        .start()
        .expect("could not initialize logger");
}

/// Zero-pads a textual key to the index's configured key size.
pub fn pad_key(text: &str, key_size: usize) -> Result<Vec<u8>> {
    ensure!(
        text.len() <= key_size,
        "key {:?} is longer than the configured key size {}",
        text,
        key_size
    );
    let mut key = vec![0u8; key_size];
    key[..text.len()].copy_from_slice(text.as_bytes());
    Ok(key)
}
