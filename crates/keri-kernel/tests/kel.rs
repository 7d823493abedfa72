//! End-to-end key event log scenarios through the kernel.

use anyhow::Result;
use bytes::BytesMut;

use keri_kernel::core::{
    next_commitment, Digest, EscrowReason, EventBuilder, MatterCode, PublicKey, Seal,
    SignedMessage, Signer, Threshold, ValidationError,
};
use keri_kernel::store::{LogStore, MemoryStore};
use keri_kernel::{Habitat, Kernel, KernelConfig, ProcessOutcome};

const CODE: MatterCode = MatterCode::Blake3_256;

fn kernel() -> Kernel<MemoryStore> {
    Kernel::open(MemoryStore::new(), KernelConfig::default()).unwrap()
}

fn commit(keys: &[PublicKey]) -> Digest {
    next_commitment(&Threshold::Count(1), keys, CODE).unwrap()
}

#[test]
fn rotation_to_committed_key_then_replayed_key() -> Result<()> {
    let k0 = Signer::from_seed(&[10; 32], true);
    let k1 = Signer::from_seed(&[11; 32], true);
    let k2 = Signer::from_seed(&[12; 32], true);
    let mut kernel = kernel();

    let icp = EventBuilder::inception(vec![k0.public_key()])
        .next(commit(&[k1.public_key()]))
        .build()?;
    let icp = SignedMessage::sign(icp, &[&k0]);
    let prefix = icp.prefix().clone();
    assert!(kernel.ingest(&icp.to_bytes()?)?.outcome.is_accepted());

    let state = kernel.key_state(&prefix).unwrap().clone();
    let rot = EventBuilder::rotation(&state, vec![k1.public_key()])
        .next(commit(&[k2.public_key()]))
        .build()?;
    let rot = SignedMessage::sign(rot, &[&k0]);
    assert!(kernel.ingest(&rot.to_bytes()?)?.outcome.is_accepted());

    let state = kernel.key_state(&prefix).unwrap().clone();
    assert_eq!(state.sn, 1);
    assert_eq!(state.keys, vec![k1.public_key()]);

    // K1 again, but the state now commits to K2.
    let again = EventBuilder::rotation(&state, vec![k1.public_key()])
        .next(commit(&[k0.public_key()]))
        .build()?;
    let again = SignedMessage::sign(again, &[&k1]);
    let report = kernel.ingest(&again.to_bytes()?)?;
    assert_eq!(
        report.outcome,
        ProcessOutcome::Rejected {
            prefix: prefix.clone(),
            sn: 2,
            error: ValidationError::NextCommitmentMismatch { sn: 2 },
        }
    );
    assert_eq!(kernel.key_state(&prefix).unwrap().sn, 1);
    assert_eq!(kernel.store().last_sn(&prefix)?, Some(1));
    Ok(())
}

#[test]
fn flipped_rotation_key_breaks_commitment() -> Result<()> {
    let signers: Vec<_> = (20..23u8).map(|i| Signer::from_seed(&[i; 32], true)).collect();
    let mut kernel = kernel();
    let hab = Habitat::new(signers.clone(), &KernelConfig::default())?;
    kernel.ingest_message(hab.kel()[0].clone())?;

    let mut raw = *signers[1].public_key().as_bytes();
    raw[7] ^= 0x01;
    let flipped = PublicKey::new(MatterCode::Ed25519, raw)?;

    let rot = EventBuilder::rotation(hab.state(), vec![flipped]).build()?;
    let rot = SignedMessage::sign(rot, &[&hab.current_signers()[0]]);
    let report = kernel.ingest_message(rot)?;
    assert!(matches!(
        report.outcome,
        ProcessOutcome::Rejected {
            error: ValidationError::NextCommitmentMismatch { sn: 1 },
            ..
        }
    ));
    Ok(())
}

#[test]
fn chain_links_each_event_to_its_predecessor() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let mut hab = Habitat::generate(4, &config)?;
    hab.interact(Vec::new())?;
    hab.rotate()?;
    hab.interact(vec![Seal::Digest(Digest::compute(CODE, b"anchor")?)])?;
    hab.rotate()?;

    let mut buf = BytesMut::from(&hab.kel_messages()?[..]);
    let reports = kernel.ingest_stream(&mut buf)?;
    assert!(buf.is_empty());
    assert!(reports.iter().all(|r| r.outcome.is_accepted()));

    let log = kernel.kel(hab.prefix())?;
    assert_eq!(log.len(), 5);
    for pair in log.windows(2) {
        let digest = pair[0].event.digest(CODE)?;
        assert_eq!(pair[1].inner().prior(), Some(&digest));
    }
    assert_eq!(kernel.key_state(hab.prefix()), Some(hab.state()));
    Ok(())
}

#[test]
fn out_of_order_event_is_escrowed_then_replayed() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let mut hab = Habitat::generate(3, &config)?;
    let ixn1 = hab.interact(Vec::new())?;
    let ixn2 = hab.interact(Vec::new())?;
    let prefix = hab.prefix().clone();

    kernel.ingest_message(hab.kel()[0].clone())?;
    let report = kernel.ingest_message(ixn2)?;
    assert_eq!(
        report.outcome,
        ProcessOutcome::Escrowed {
            prefix: prefix.clone(),
            sn: 2,
            reason: EscrowReason::OutOfOrder,
        }
    );
    assert_eq!(kernel.store().last_sn(&prefix)?, Some(0));

    let report = kernel.ingest_message(ixn1)?;
    assert!(report.outcome.is_accepted());
    assert_eq!(report.replayed.len(), 1);
    assert!(report.replayed[0].is_accepted());
    assert_eq!(report.accepted.len(), 2);

    assert_eq!(kernel.key_state(&prefix).unwrap().sn, 2);
    assert_eq!(kernel.store().last_sn(&prefix)?, Some(2));
    assert_eq!(kernel.router().escrow_len(), 0);
    Ok(())
}

#[test]
fn events_before_inception_wait_for_it() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let mut hab = Habitat::generate(3, &config)?;
    let rot = hab.rotate()?;

    let report = kernel.ingest_message(rot)?;
    assert!(matches!(
        report.outcome,
        ProcessOutcome::Escrowed {
            reason: EscrowReason::MissingInception,
            ..
        }
    ));
    let report = kernel.ingest_message(hab.kel()[0].clone())?;
    assert_eq!(report.accepted.len(), 2);
    assert_eq!(kernel.key_state(hab.prefix()), Some(hab.state()));
    Ok(())
}

#[test]
fn conflicting_events_raise_one_duplicity_record() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let mut hab = Habitat::generate(3, &config)?;
    let incepted = hab.state().clone();
    let ixn = hab.interact(Vec::new())?;
    let prefix = hab.prefix().clone();

    let fork = EventBuilder::interaction(&incepted)
        .seals(vec![Seal::Digest(Digest::compute(CODE, b"other")?)])
        .build()?;
    let fork = SignedMessage::sign(fork, &[&hab.current_signers()[0]]);

    kernel.ingest_message(hab.kel()[0].clone())?;
    kernel.ingest_message(ixn.clone())?;
    let report = kernel.ingest_message(fork.clone())?;
    assert_eq!(
        report.outcome,
        ProcessOutcome::Duplicity {
            prefix: prefix.clone(),
            sn: 1
        }
    );

    let records = kernel.duplicity_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].accepted, ixn.event.digest(CODE)?);
    assert_eq!(records[0].conflicting, vec![fork.event.digest(CODE)?]);

    let validator = kernel.router().validator(&prefix).unwrap();
    assert!(validator.is_compromised());
    assert_eq!(validator.undisputed_sn(), Some(0));

    // Frozen: later events are refused and the record does not multiply.
    let next = hab.interact(Vec::new())?;
    let report = kernel.ingest_message(next)?;
    assert!(matches!(report.outcome, ProcessOutcome::Duplicity { .. }));
    assert_eq!(kernel.duplicity_records().len(), 1);

    assert_eq!(kernel.store().duplicities(&prefix)?.len(), 1);
    assert_eq!(kernel.store().last_sn(&prefix)?, Some(1));
    Ok(())
}

#[test]
fn resubmitted_event_is_ignored() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let hab = Habitat::generate(2, &config)?;
    kernel.ingest_message(hab.kel()[0].clone())?;
    let report = kernel.ingest_message(hab.kel()[0].clone())?;
    assert!(matches!(report.outcome, ProcessOutcome::Ignored { sn: 0, .. }));
    assert!(kernel.duplicity_records().is_empty());
    Ok(())
}

#[test]
fn partial_stream_waits_for_more_bytes() -> Result<()> {
    let config = KernelConfig::default();
    let mut kernel = kernel();
    let mut hab = Habitat::generate(3, &config)?;
    hab.interact(Vec::new())?;
    let bytes = hab.kel_messages()?;
    let split = bytes.len() - 10;

    let mut buf = BytesMut::from(&bytes[..split]);
    let reports = kernel.ingest_stream(&mut buf)?;
    assert_eq!(reports.len(), 2);
    assert!(reports[0].outcome.is_accepted());
    assert!(matches!(reports[1].outcome, ProcessOutcome::NeedMoreInput { .. }));
    assert!(!buf.is_empty());

    buf.extend_from_slice(&bytes[split..]);
    let reports = kernel.ingest_stream(&mut buf)?;
    assert!(reports[0].outcome.is_accepted());
    assert!(buf.is_empty());
    assert_eq!(kernel.key_state(hab.prefix()).unwrap().sn, 1);
    Ok(())
}
