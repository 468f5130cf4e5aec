use feedgate::config::sensitive::{SecurityLevel, SensitiveValueCodec};
use rsa::RsaPrivateKey;

#[test]
fn test_plain_prefix_and_bare_values() {
    let codec = SensitiveValueCodec::ephemeral();
    assert_eq!(codec.decode("pl:secret").unwrap(), "secret");
    assert_eq!(codec.decode("no prefix at all").unwrap(), "no prefix at all");
}

#[test]
fn test_encode_plain() {
    let codec = SensitiveValueCodec::ephemeral();
    assert_eq!(
        codec.encode("value", SecurityLevel::Plain).unwrap(),
        "pl:value"
    );
}

#[test]
fn test_obfuscation_round_trip() {
    let codec = SensitiveValueCodec::new([7u8; 32], None);
    let stored = codec
        .encode("hunter2", SecurityLevel::Obfuscated)
        .unwrap();
    assert!(stored.starts_with("obf:"));
    assert!(!stored.contains("hunter2"));
    assert_eq!(codec.decode(&stored).unwrap(), "hunter2");
}

#[test]
fn test_obfuscation_is_keyed() {
    let codec_a = SensitiveValueCodec::new([1u8; 32], None);
    let codec_b = SensitiveValueCodec::new([2u8; 32], None);
    let stored = codec_a
        .encode("hunter2", SecurityLevel::Obfuscated)
        .unwrap();
    // A different instance secret cannot recover the plaintext.
    match codec_b.decode(&stored) {
        Ok(other) => assert_ne!(other, "hunter2"),
        Err(_) => {}
    }
}

#[test]
fn test_obfuscated_long_value_round_trip() {
    let codec = SensitiveValueCodec::new([9u8; 32], None);
    // Longer than one keystream block.
    let plaintext = "x".repeat(200);
    let stored = codec
        .encode(&plaintext, SecurityLevel::Obfuscated)
        .unwrap();
    assert_eq!(codec.decode(&stored).unwrap(), plaintext);
}

#[test]
fn test_rsa_round_trip() {
    // OAEP with SHA-256 needs a modulus beyond its 66-byte overhead.
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let codec = SensitiveValueCodec::new([0u8; 32], Some(key));
    let stored = codec.encode("secret", SecurityLevel::Encrypted).unwrap();
    assert!(stored.starts_with("pkc:"));
    assert_eq!(codec.decode(&stored).unwrap(), "secret");
}

#[test]
fn test_encrypted_without_keypair_fails() {
    let codec = SensitiveValueCodec::new([0u8; 32], None);
    assert!(codec.encode("secret", SecurityLevel::Encrypted).is_err());
    assert!(codec.decode("pkc:AAAA").is_err());
}

#[test]
fn test_garbage_obfuscated_value_fails() {
    let codec = SensitiveValueCodec::ephemeral();
    assert!(codec.decode("obf:!!!not-base64!!!").is_err());
    assert!(codec.decode("obf:QQ==").is_err());
}
