#![no_main]

use libfuzzer_sys::fuzz_target;
use notifyhub_providers::ProviderRegistry;
use notifyhub_types::ErrorKind;

fuzz_target!(|data: &str| {
    // Every registered scheme must either parse to READY or reject with
    // InvalidConfiguration — never panic (§4.1's parse state machine).
    let registry = ProviderRegistry::with_defaults();
    match registry.build(data) {
        Ok((parsed, provider)) => {
            assert!(!parsed.scheme.is_empty());
            let _ = provider.service_id();
        }
        Err(err) => {
            assert_eq!(err.kind, ErrorKind::InvalidConfiguration);
            // Credentials must never leak into the error message.
            assert!(!err.message.contains("password"));
        }
    }
});
