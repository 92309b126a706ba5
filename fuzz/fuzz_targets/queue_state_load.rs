#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use notifyhub_queue::{queue_path, QueueStore};
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(td) = tempdir() else { return };

    if fs::write(queue_path(td.path()), data).is_ok() {
        let store = QueueStore::new(td.path());
        // Arbitrary bytes must never panic the loader, only fail cleanly.
        let _ = store.load();
    }
});
