#![no_main]

use libfuzzer_sys::fuzz_target;
use notifyhub_attachment::AttachmentSet;

fuzz_target!(|rest: String| {
    // Always the `data:` branch: prepending the scheme keeps this fuzz
    // target network-free (an `http://`-prefixed input would otherwise
    // reach `add_http`'s blocking HEAD request).
    let mut set = AttachmentSet::new();
    let input = format!("data:{rest}");
    if set.add(&input, None).is_ok() {
        let attachment = &set.get_all()[0];
        // A successfully constructed data-URL attachment decodes eagerly;
        // reading it back must never panic.
        let _ = attachment.open();
        let _ = attachment.base64();
    }
});
