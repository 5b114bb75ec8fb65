#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use agilevault_crypto_core::cipher::{decrypt, encrypt, BLOCK_LEN};
use agilevault_crypto_core::envelope::{open_transport, seal_transport, SALT_LEN};
use agilevault_crypto_core::kdf::{legacy_stretch, DerivedKey, IV_LEN, KEY_LEN};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cipher_roundtrip(
        key in any::<[u8; KEY_LEN]>(),
        iv in any::<[u8; IV_LEN]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let ct = encrypt(&key, &iv, &plaintext).unwrap();
        prop_assert_eq!(ct.len() % BLOCK_LEN, 0);
        prop_assert!(ct.len() > plaintext.len());
        let pt = decrypt(&key, &iv, &ct).unwrap();
        prop_assert_eq!(pt.expose(), plaintext.as_slice());
    }

    #[test]
    fn envelope_transport_roundtrip(
        salt in any::<[u8; SALT_LEN]>(),
        ciphertext in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let text = seal_transport(&salt, &ciphertext);
        let env = open_transport(&text).unwrap();
        prop_assert_eq!(env.salt, Some(salt));
        prop_assert_eq!(env.ciphertext, ciphertext);
    }

    #[test]
    fn stretched_key_opens_what_it_sealed(
        material in proptest::collection::vec(any::<u8>(), 1..128),
        salt in any::<[u8; SALT_LEN]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let sealing = legacy_stretch(&material, &salt);
        let ct = encrypt(sealing.key.expose(), sealing.iv.expose(), &plaintext).unwrap();
        let text = seal_transport(&salt, &ct);

        let env = open_transport(&text).unwrap();
        let opening = DerivedKey::for_envelope(&material, &env);
        let pt = decrypt(opening.key.expose(), opening.iv.expose(), &env.ciphertext).unwrap();
        prop_assert_eq!(pt.expose(), plaintext.as_slice());
    }

    #[test]
    fn legacy_stretch_is_a_function_of_its_inputs(
        material in proptest::collection::vec(any::<u8>(), 0..64),
        salt in any::<[u8; SALT_LEN]>(),
    ) {
        let a = legacy_stretch(&material, &salt);
        let b = legacy_stretch(&material, &salt);
        prop_assert_eq!(a.key.expose(), b.key.expose());
        prop_assert_eq!(a.iv.expose(), b.iv.expose());
    }
}
