#![no_main]

use libfuzzer_sys::fuzz_target;
use memberstore::{Archive, ArchiveOptions};
use tempfile::TempDir;

fuzz_target!(|data: &[u8]| {
    let dir = match TempDir::new() {
        Ok(d) => d,
        Err(_) => return,
    };

    // Same bytes through both backends and through format sniffing
    let candidates = [
        ("input.tar", ArchiveOptions::tar("")),
        ("input.zip", ArchiveOptions::zip()),
        ("input", ArchiveOptions::new()),
    ];

    for (file, options) in candidates {
        let path = dir.path().join(file);
        if std::fs::write(&path, data).is_err() {
            return;
        }

        // Unknown formats are rejected at open - should never panic
        let mut archive = match Archive::open_with(&path, options) {
            Ok(a) => a,
            Err(_) => continue,
        };

        let _ = archive.members();
        let names = match archive.names() {
            Ok(n) => n,
            Err(_) => continue, // Expected for corrupted data
        };

        for name in names.iter().take(16) {
            let _ = archive.read(name);
        }
        let _ = archive.read("missing.txt");
    }
});
