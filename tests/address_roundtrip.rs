//! Address, hash and signature surfaces, plus randomized round-trips.

mod asm;

use asm::Asm;
use ed25519_dalek::{Signer, SigningKey};
use proptest::prelude::*;
use txscript::opcode as op;
use txscript::{addr, Actuator, Envs, Value};

fn run_stack(code: Vec<u8>) -> Vec<Value> {
    let mut a = Actuator::new(&[0; 10], code, None, Envs::new(Vec::new(), 0), 1);
    txscript::script_run(&mut a).expect("script runs");
    a.stack_data()
}

#[test]
fn base58_instruction_roundtrip() {
    let payload = [7u8, 0, 255, 3];
    let code = Asm::new()
        .data(&payload)
        .arg1(op::FN_BASE58, 0)
        .arg1(op::FN_BASE58, 0)
        .build();
    assert_eq!(run_stack(code), vec![Value::Bytes(payload.to_vec())]);
}

#[test]
fn base32_and_base64_are_unpadded() {
    let code = Asm::new().data(b"hi").arg1(op::FN_BASE32, 0).build();
    let Value::Str(s) = &run_stack(code)[0] else {
        panic!("expected a string")
    };
    assert!(!s.contains('='));

    let code = Asm::new().data(&[251, 255]).arg1(op::FN_BASE64, 0).build();
    let Value::Str(s) = &run_stack(code)[0] else {
        panic!("expected a string")
    };
    assert!(!s.contains('=') && !s.contains('/') && !s.contains('+'));
}

#[test]
fn pubhash_and_address_instructions_roundtrip() {
    let pubkey = [9u8; 32];
    // Hash the key, encode it with a prefix, decode back to the hash.
    let code = Asm::new()
        .data(&pubkey)
        .arg1(op::FN_PUBHASH, 0)
        .arg1(op::CLONE, 1)
        .text("cx")
        .arg1(op::FN_ADDRESS, 0)
        .arg1(op::FN_PUBHASH, 0)
        .build();
    let stack = run_stack(code);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0], stack[1]);
    assert_eq!(stack[0], Value::Bytes(addr::pub_key_hash(&pubkey, &[])));
}

#[test]
fn multisig_total_address_instruction() {
    let k0 = [1u8; 32];
    let k1 = [2u8; 32];
    let k2 = [3u8; 32];

    let mut pk0 = vec![0u8];
    pk0.extend_from_slice(&k0);
    let mut pk1 = vec![1u8];
    pk1.extend_from_slice(&k1);
    let mut pkh2 = vec![2u8];
    pkh2.extend_from_slice(&addr::pub_key_hash(&k2, &[]));

    // Two lists on the stack: signer keys and unsigned member hashes.
    let code = Asm::new()
        .data(&pk0)
        .data(&pk1)
        .arg1(op::POPS, 2)
        .data(&pkh2)
        .arg1(op::POPS, 1)
        .arg1(op::FN_MPUBHASH, 0)
        .build();
    let stack = run_stack(code);
    let expect = addr::mul_hash(&[pk0, pk1], &[pkh2]).unwrap();
    assert_eq!(stack, vec![Value::Bytes(expect.clone())]);
    // Ratio prefix (n=2, T=3) plus the 20-byte hash.
    assert_eq!(&hex::encode(&expect)[..4], "0203");
    assert_eq!(expect.len(), 22);
}

#[test]
fn checksig_instruction_verifies_against_the_spend_message() {
    let sk = SigningKey::from_bytes(&[3u8; 32]);
    let vk = sk.verifying_key();
    let msg = b"spend-me".to_vec();
    let sig = sk.sign(&msg).to_bytes().to_vec();

    let mut envs = Envs::new(Vec::new(), 0);
    let hook_msg = msg.clone();
    envs.set_spent_msg_hook(Box::new(move |_| hook_msg.clone()));

    let code = Asm::new()
        .data(&sig)
        .data(vk.as_bytes())
        .arg1(op::FN_CHECKSIG, 0)
        .build();
    let mut a = Actuator::new(&[0; 10], code, None, envs, 1);
    txscript::script_run(&mut a).unwrap();
    assert_eq!(a.stack_data(), vec![Value::Bool(true)]);
}

#[test]
fn mchecksig_registers_signer_positions() {
    let sk0 = SigningKey::from_bytes(&[4u8; 32]);
    let sk2 = SigningKey::from_bytes(&[5u8; 32]);
    let msg = b"multi".to_vec();

    let mut pk0 = vec![0u8];
    pk0.extend_from_slice(sk0.verifying_key().as_bytes());
    let mut pk2 = vec![2u8];
    pk2.extend_from_slice(sk2.verifying_key().as_bytes());
    let sig0 = sk0.sign(&msg).to_bytes().to_vec();
    let sig2 = sk2.sign(&msg).to_bytes().to_vec();

    let mut envs = Envs::new(Vec::new(), 0);
    let hook_msg = msg.clone();
    envs.set_spent_msg_hook(Box::new(move |_| hook_msg.clone()));

    // MULSIG answers per signer position after FN_MCHECKSIG ran.
    let code = Asm::new()
        .data(&sig0)
        .data(&sig2)
        .arg1(op::POPS, 2)
        .data(&pk0)
        .data(&pk2)
        .arg1(op::POPS, 2)
        .arg1(op::FN_MCHECKSIG, 0)
        .arg1(op::MULSIG, 0)
        .arg1(op::MULSIG, 1)
        .arg1(op::MULSIG, 2)
        .build();
    let mut a = Actuator::new(&[0; 10], code, None, envs, 1);
    txscript::script_run(&mut a).unwrap();
    assert_eq!(
        a.stack_data(),
        vec![
            Value::Bool(true),
            Value::Bool(true),
            Value::Bool(false),
            Value::Bool(true),
        ]
    );
}

#[test]
fn hash_instructions_have_fixed_widths() {
    for (c, len) in [
        (op::FN_HASH224, 28usize),
        (op::FN_HASH256, 32),
        (op::FN_HASH384, 48),
        (op::FN_HASH512, 64),
    ] {
        for algo in 0..3u8 {
            let code = Asm::new().data(b"payload").arg1(c, algo).build();
            let stack = run_stack(code);
            let Value::Bytes(h) = &stack[0] else {
                panic!("expected bytes")
            };
            assert_eq!(h.len(), len, "opcode {c} algo {algo}");
        }
    }
}

proptest! {
    #[test]
    fn address_roundtrip_for_any_hash(pkh in proptest::collection::vec(any::<u8>(), 20),
                                      prefix in "[a-z]{1,4}") {
        let encoded = addr::encode(&pkh, &prefix);
        let (got, got_prefix) = addr::decode(&encoded).unwrap();
        prop_assert_eq!(got, pkh);
        prop_assert_eq!(got_prefix, prefix);
    }

    #[test]
    fn reverse_twice_is_identity_for_bytes(data in proptest::collection::vec(any::<u8>(), 0..40)) {
        let code = Asm::new()
            .data(&data)
            .op(op::REVERSE)
            .op(op::REVERSE)
            .build();
        prop_assert_eq!(run_stack(code), vec![Value::Bytes(data)]);
    }

    #[test]
    fn substr_full_width_is_identity(s in "[a-zé✓]{0,12}") {
        let n = s.chars().count() as u16;
        let code = Asm::new().text(&s).int(0).arg2(op::SUBSTR, n).build();
        prop_assert_eq!(run_stack(code), vec![Value::Str(s)]);
    }
}
