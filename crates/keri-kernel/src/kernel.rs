//! The Kernel: an event router whose accepted events are persisted.
//!
//! Every event the router accepts, directly or through escrow replay, is
//! written to the store in acceptance order. Opening a kernel replays the
//! stored logs through a fresh router, so key state and duplicity evidence
//! survive a restart.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use keri_kernel_core::{
    DuplicityRecord, EventRouter, KeyState, Prefix, ProcessOutcome, ProcessReport, SignedMessage,
};
use keri_kernel_store::{InsertResult, LogStore, LogStoreExt};

use crate::config::KernelConfig;
use crate::error::Result;
use crate::habitat::Habitat;

/// The main Kernel struct.
pub struct Kernel<S: LogStore> {
    router: EventRouter,
    store: Arc<S>,
    config: KernelConfig,
}

impl<S: LogStore> Kernel<S> {
    /// Open a kernel over `store`, rebuilding key state from its logs.
    pub fn open(store: S, config: KernelConfig) -> Result<Self> {
        let mut kernel = Self {
            router: EventRouter::new(config.router.clone()),
            store: Arc::new(store),
            config,
        };
        kernel.hydrate()?;
        Ok(kernel)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn key_state(&self, prefix: &Prefix) -> Option<&KeyState> {
        self.router.key_state(prefix)
    }

    pub fn duplicity_records(&self) -> &[DuplicityRecord] {
        self.router.duplicity_records()
    }

    /// Incept a habitat from qualified seeds and accept its inception.
    pub fn create_habitat(&mut self, seeds: &[&str]) -> Result<Habitat> {
        let hab = Habitat::from_seeds(seeds, &self.config)?;
        for msg in hab.kel() {
            self.ingest_message(msg.clone())?;
        }
        Ok(hab)
    }

    /// Process one message from the head of `bytes`.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<ProcessReport> {
        let report = self.router.process_one(bytes);
        self.persist(&report)?;
        Ok(report)
    }

    /// Process an already parsed message.
    pub fn ingest_message(&mut self, msg: SignedMessage) -> Result<ProcessReport> {
        let report = self.router.process_message(msg);
        self.persist(&report)?;
        Ok(report)
    }

    /// Process every complete message in `buf`, leaving any partial tail.
    pub fn ingest_stream(&mut self, buf: &mut BytesMut) -> Result<Vec<ProcessReport>> {
        let reports = self.router.process_stream(buf);
        for report in &reports {
            self.persist(report)?;
        }
        Ok(reports)
    }

    /// The stored log of `prefix` as signed messages.
    pub fn kel(&self, prefix: &Prefix) -> Result<Vec<SignedMessage>> {
        Ok(self.store.load_log(prefix)?)
    }

    fn persist(&mut self, report: &ProcessReport) -> Result<()> {
        let code = self.config.digest_code();
        for msg in &report.accepted {
            match self.store.insert_message(msg, code)? {
                InsertResult::Inserted | InsertResult::AlreadyExists => {}
                InsertResult::Conflict { existing } => {
                    // Another writer stored a different event at this position.
                    warn!(
                        prefix = %msg.prefix(),
                        sn = msg.sn(),
                        "accepted event conflicts with store"
                    );
                    self.router.mark_duplicitous(msg.prefix(), msg.sn(), existing);
                    self.store_duplicity(msg.prefix())?;
                }
            }
        }

        let outcomes = std::iter::once(&report.outcome).chain(report.replayed.iter());
        let duplicitous: Vec<Prefix> = outcomes
            .filter_map(|o| match o {
                ProcessOutcome::Duplicity { prefix, .. } => Some(prefix.clone()),
                _ => None,
            })
            .collect();
        for prefix in duplicitous {
            self.store_duplicity(&prefix)?;
        }
        Ok(())
    }

    fn store_duplicity(&self, prefix: &Prefix) -> Result<()> {
        if let Some(record) = self
            .router
            .duplicity_records()
            .iter()
            .find(|r| &r.prefix == prefix)
        {
            self.store.record_duplicity(record)?;
        }
        Ok(())
    }

    fn hydrate(&mut self) -> Result<()> {
        let prefixes = self.store.prefixes()?;
        let mut events = 0;
        for prefix in &prefixes {
            for msg in self.store.load_log(prefix)? {
                let sn = msg.sn();
                let report = self.router.process_message(msg);
                if !report.outcome.is_accepted() {
                    warn!(
                        prefix = %prefix,
                        sn,
                        outcome = ?report.outcome,
                        "stored event not accepted on reload"
                    );
                    break;
                }
                events += 1;
            }
            for record in self.store.duplicities(prefix)? {
                for conflicting in &record.conflicting {
                    self.router
                        .mark_duplicitous(prefix, record.sn, *conflicting);
                }
            }
            debug!(prefix = %prefix, "log reloaded");
        }
        if !prefixes.is_empty() {
            info!(identifiers = prefixes.len(), events, "kernel state rebuilt from store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keri_kernel_core::Threshold;
    use keri_kernel_store::MemoryStore;

    #[test]
    fn test_accepted_events_are_stored() {
        let mut kernel = Kernel::open(MemoryStore::new(), KernelConfig::default()).unwrap();
        let mut hab = Habitat::generate(3, kernel.config()).unwrap();
        kernel.ingest_message(hab.kel()[0].clone()).unwrap();
        let ixn = hab.interact(Vec::new()).unwrap();
        kernel.ingest(&ixn.to_bytes().unwrap()).unwrap();

        assert_eq!(kernel.store().last_sn(hab.prefix()).unwrap(), Some(1));
        assert_eq!(kernel.kel(hab.prefix()).unwrap(), hab.kel());
    }

    #[test]
    fn test_rejected_events_are_not_stored() {
        let mut kernel = Kernel::open(MemoryStore::new(), KernelConfig::default()).unwrap();
        let mut hab = Habitat::generate(3, kernel.config()).unwrap();
        kernel.ingest_message(hab.kel()[0].clone()).unwrap();

        let mut ixn = hab.interact(Vec::new()).unwrap();
        ixn.signatures.clear();
        let report = kernel.ingest_message(ixn).unwrap();
        assert!(matches!(report.outcome, ProcessOutcome::Rejected { .. }));
        assert_eq!(kernel.store().last_sn(hab.prefix()).unwrap(), Some(0));
    }

    #[test]
    fn test_replayed_events_are_stored_in_order() {
        let mut kernel = Kernel::open(MemoryStore::new(), KernelConfig::default()).unwrap();
        let mut hab = Habitat::generate(3, kernel.config()).unwrap();
        hab.interact(Vec::new()).unwrap();
        hab.rotate().unwrap();

        let kel = hab.kel().to_vec();
        for msg in kel.iter().rev() {
            kernel.ingest_message(msg.clone()).unwrap();
        }
        assert_eq!(kernel.kel(hab.prefix()).unwrap(), kel);
        assert_eq!(kernel.key_state(hab.prefix()).unwrap().sn, 2);
    }

    #[test]
    fn test_create_habitat() {
        let config = KernelConfig::default().with_keys(1, Threshold::Count(1));
        let mut kernel = Kernel::open(MemoryStore::new(), config).unwrap();
        let hab = kernel
            .create_habitat(&[
                "ArwXoACJgOleVZ2PY7kXn7rA0II0mHYDhc6WrBH8fDAc",
                "A6zz7M08-HQSFq92sJ8KJOT2cZ47x7pXFQLPB0pckB3Q",
            ])
            .unwrap();
        assert_eq!(kernel.key_state(hab.prefix()), Some(hab.state()));
    }
}
