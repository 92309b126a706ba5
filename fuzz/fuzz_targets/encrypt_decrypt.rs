#![no_main]

use libfuzzer_sys::fuzz_target;
use notifyhub_encrypt::{decrypt, encrypt};

fuzz_target!(|data: &[u8]| {
    let passphrase = "test-passphrase-fuzz";

    if let Ok(encrypted) = encrypt(data, passphrase)
        && let Ok(encrypted_str) = std::str::from_utf8(&encrypted)
        && let Ok(decrypted) = decrypt(encrypted_str, passphrase)
    {
        assert_eq!(data.to_vec(), decrypted);
    }
});
