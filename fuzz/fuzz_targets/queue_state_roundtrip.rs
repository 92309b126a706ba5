#![no_main]

use libfuzzer_sys::fuzz_target;
use notifyhub_queue::QueueState;

fuzz_target!(|data: &[u8]| {
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(state) = serde_json::from_str::<QueueState>(json_str)
        && let Ok(roundtripped) = serde_json::to_string(&state)
        && let Ok(parsed) = serde_json::from_str::<QueueState>(&roundtripped)
    {
        assert_eq!(state.scheduled_jobs.len(), parsed.scheduled_jobs.len());
        assert_eq!(state.queued_jobs.len(), parsed.queued_jobs.len());
        assert_eq!(state.queue_depth(), parsed.queue_depth());
    }
});
