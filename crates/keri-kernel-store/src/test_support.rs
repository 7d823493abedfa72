use keri_kernel_core::{
    Digest, EventBuilder, EventValidator, MatterCode, Seal, SignedMessage, Signer,
};

/// An inception followed by `interactions` interaction events, all valid.
pub fn chain(seed: u8, interactions: usize) -> (Signer, Vec<SignedMessage>) {
    let signer = Signer::from_seed(&[seed; 32], true);
    let mut validator = EventValidator::new(MatterCode::Blake3_256);
    let icp = EventBuilder::inception(vec![signer.public_key()])
        .build()
        .unwrap();
    let icp = SignedMessage::sign(icp, &[&signer]);
    let mut state = validator.apply(&icp).unwrap().clone();
    let mut out = vec![icp];
    for _ in 0..interactions {
        let ixn = EventBuilder::interaction(&state).build().unwrap();
        let ixn = SignedMessage::sign(ixn, &[&signer]);
        state = validator.apply(&ixn).unwrap().clone();
        out.push(ixn);
    }
    (signer, out)
}

/// A second, differently sealed interaction at the same position as `at`.
pub fn fork(signer: &Signer, chain: &[SignedMessage], at: usize) -> SignedMessage {
    let mut validator = EventValidator::new(MatterCode::Blake3_256);
    let mut state = None;
    for msg in &chain[..at] {
        state = Some(validator.apply(msg).unwrap().clone());
    }
    let seal = Seal::Digest(Digest::compute(MatterCode::Blake3_256, b"fork").unwrap());
    let ixn = EventBuilder::interaction(&state.unwrap())
        .seals(vec![seal])
        .build()
        .unwrap();
    SignedMessage::sign(ixn, &[signer])
}
