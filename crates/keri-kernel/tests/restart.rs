//! Kernel state survives a restart over SQLite.

use anyhow::Result;
use tempfile::tempdir;

use keri_kernel::core::{Digest, EventBuilder, MatterCode, Seal, SerialKind, SignedMessage};
use keri_kernel::store::{LogEntry, LogStore, SqliteStore};
use keri_kernel::{Habitat, Kernel, KernelConfig, ProcessOutcome};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn key_state_rebuilt_after_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("kel.db");
    let config = KernelConfig::default().with_kind(SerialKind::Cbor);

    let mut hab = Habitat::generate(3, &config)?;
    {
        let mut kernel = Kernel::open(SqliteStore::open(&path)?, config.clone())?;
        kernel.ingest_message(hab.kel()[0].clone())?;
        kernel.ingest_message(hab.interact(Vec::new())?)?;
        kernel.ingest_message(hab.rotate()?)?;
    }

    let mut kernel = Kernel::open(SqliteStore::open(&path)?, config)?;
    assert_eq!(kernel.key_state(hab.prefix()), Some(hab.state()));
    assert_eq!(kernel.kel(hab.prefix())?, hab.kel());

    // The reopened kernel keeps validating from where it stopped.
    let report = kernel.ingest_message(hab.interact(Vec::new())?)?;
    assert!(report.outcome.is_accepted());
    assert_eq!(kernel.store().last_sn(hab.prefix())?, Some(3));
    Ok(())
}

#[test]
fn duplicity_survives_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("kel.db");
    let config = KernelConfig::default();

    let mut hab = Habitat::generate(3, &config)?;
    let incepted = hab.state().clone();
    let ixn = hab.interact(Vec::new())?;
    let fork = EventBuilder::interaction(&incepted)
        .seals(vec![Seal::Digest(Digest::compute(MatterCode::Blake3_256, b"fork")?)])
        .build()?;
    let fork = SignedMessage::sign(fork, &[&hab.current_signers()[0]]);

    {
        let mut kernel = Kernel::open(SqliteStore::open(&path)?, config.clone())?;
        kernel.ingest_message(hab.kel()[0].clone())?;
        kernel.ingest_message(ixn)?;
        kernel.ingest_message(fork)?;
        assert_eq!(kernel.duplicity_records().len(), 1);
    }

    let mut kernel = Kernel::open(SqliteStore::open(&path)?, config)?;
    assert_eq!(kernel.duplicity_records().len(), 1);
    let validator = kernel.router().validator(hab.prefix()).unwrap();
    assert_eq!(validator.undisputed_sn(), Some(0));

    let report = kernel.ingest_message(hab.interact(Vec::new())?)?;
    assert!(matches!(report.outcome, ProcessOutcome::Duplicity { .. }));
    Ok(())
}

#[test]
fn store_conflict_marks_identifier_duplicitous() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("kel.db");
    let config = KernelConfig::default();

    let mut hab = Habitat::generate(3, &config)?;
    let incepted = hab.state().clone();
    let ixn = hab.interact(Vec::new())?;
    let fork = EventBuilder::interaction(&incepted)
        .seals(vec![Seal::Digest(Digest::compute(MatterCode::Blake3_256, b"fork")?)])
        .build()?;
    let fork = SignedMessage::sign(fork, &[&hab.current_signers()[0]]);

    let mut kernel = Kernel::open(SqliteStore::open(&path)?, config.clone())?;
    kernel.ingest_message(hab.kel()[0].clone())?;

    // A second writer stores the fork behind this kernel's back.
    let other = SqliteStore::open(&path)?;
    other.insert(&LogEntry::from_message(&fork, config.digest_code())?)?;

    let report = kernel.ingest_message(ixn)?;
    assert!(report.outcome.is_accepted());
    assert!(kernel.router().validator(hab.prefix()).unwrap().is_compromised());

    let records = kernel.store().duplicities(hab.prefix())?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].conflicting, vec![fork.event.digest(config.digest_code())?]);
    Ok(())
}
