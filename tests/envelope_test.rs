// Integration test for envelope-at-rest encryption. Only compiled when
// the `envelope-encryption` feature is enabled.

#![cfg(feature = "envelope-encryption")]

#[cfg(test)]
mod envelope_tests {
    use masc::envelope::{seal, EnvelopeKey, Keyring};

    #[test]
    fn audit_payload_survives_a_seal_open_round_trip_through_a_keyring() {
        let mut keyring = Keyring::new();
        keyring.insert(EnvelopeKey::new("room-audit", &[3u8; 32]).unwrap());

        let sealing_key = EnvelopeKey::new("room-audit", &[3u8; 32]).unwrap();
        let payload = br#"{"event":"zombie_reaped","agent":"gemini-alpha"}"#;
        let sealed = seal(&sealing_key, payload).unwrap();

        let opened = masc::envelope::open(&keyring, &sealed).unwrap();
        assert_eq!(opened, payload);
    }
}
