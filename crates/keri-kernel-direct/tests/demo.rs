//! Two controllers exchange key event logs in direct mode.
//!
//! Bob rotates at tick 4 and anchors Eve's inception at tick 6. Eve only
//! listens and must end up with Bob's exact prefix and key state.

use std::time::Duration;

use anyhow::Result;

use keri_kernel::core::{Event, Seal};
use keri_kernel::store::MemoryStore;
use keri_kernel::{Habitat, Kernel, KernelConfig};
use keri_kernel_direct::memory::{self, MemoryTransport};
use keri_kernel_direct::{Action, Doer, Doist, Session, SessionConfig, SessionPhase};
use keri_kernel_testkit::vectors::{BOB_SECRETS, EVE_SECRETS};

type DemoSession = Session<MemoryStore, MemoryTransport>;

const TOCK: Duration = Duration::from_micros(31_250);
const LIMIT: Duration = Duration::from_secs(1);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pair(a: MemoryTransport, b: MemoryTransport) -> Result<(DemoSession, DemoSession)> {
    let config = KernelConfig::default();
    let bob = Session::new(
        Habitat::from_seeds(BOB_SECRETS, &config)?,
        Kernel::open(MemoryStore::new(), config.clone())?,
        a,
        SessionConfig::default()
            .at(4, Action::Rotate)
            .at(6, Action::InteractPeers)
            .at(10, Action::Close),
    )?;
    let eve = Session::new(
        Habitat::from_seeds(EVE_SECRETS, &config)?,
        Kernel::open(MemoryStore::new(), config)?,
        b,
        SessionConfig::default().with_finish_on_peer_close(true),
    )?;
    Ok((bob, eve))
}

fn assert_exchanged(bob: &DemoSession, eve: &DemoSession) {
    assert_eq!(bob.phase(), SessionPhase::Closed);
    assert_eq!(eve.phase(), SessionPhase::Closed);

    assert_eq!(eve.peers(), vec![bob.prefix().clone()]);
    assert_eq!(bob.peers(), vec![eve.prefix().clone()]);

    let seen = eve.peer_state(bob.prefix()).unwrap();
    assert_eq!(seen, bob.habitat().state());
    assert_eq!(seen.sn, 2);
    assert_eq!(seen.last_establishment_sn, 1);
    assert_eq!(eve.kernel().kel(bob.prefix()).unwrap(), bob.habitat().kel());

    assert_eq!(bob.peer_state(eve.prefix()), Some(eve.habitat().state()));

    let Event::Interaction(ixn) = bob.habitat().kel()[2].inner() else {
        panic!("expected an interaction at sn 2");
    };
    assert_eq!(
        ixn.seals,
        vec![Seal::Event {
            prefix: eve.prefix().clone(),
            sn: 0,
            digest: eve.habitat().state().last_digest,
        }]
    );
}

#[test]
fn bob_rotates_eve_observes() -> Result<()> {
    init_tracing();
    let (a, b) = memory::duplex();
    let (mut bob, mut eve) = pair(a, b)?;

    let mut doist = Doist::new(TOCK, LIMIT);
    let report = doist.run(&mut [&mut bob as &mut dyn Doer, &mut eve])?;

    assert!(report.all_done);
    assert_eq!(report.ticks, 11);
    assert!(report.ticks < doist.max_ticks());
    assert_exchanged(&bob, &eve);
    Ok(())
}

#[test]
fn exchange_survives_chunked_delivery() -> Result<()> {
    init_tracing();
    let (a, b) = memory::duplex_chunked(7);
    let (mut bob, mut eve) = pair(a, b)?;

    let mut doist = Doist::new(TOCK, LIMIT);
    let report = doist.run(&mut [&mut bob as &mut dyn Doer, &mut eve])?;

    assert!(report.all_done);
    assert_exchanged(&bob, &eve);
    Ok(())
}

#[test]
fn limit_stops_unfinished_sessions() -> Result<()> {
    init_tracing();
    let (a, b) = memory::duplex();
    let (mut bob, mut eve) = pair(a, b)?;

    // Three ticks: both inceptions cross, the scripted rotation has not run.
    let mut doist = Doist::new(Duration::from_millis(100), Duration::from_millis(300));
    let report = doist.run(&mut [&mut bob as &mut dyn Doer, &mut eve])?;
    assert!(!report.all_done);
    assert_eq!(report.ticks, 3);

    assert_eq!(eve.peer_state(bob.prefix()).map(|s| s.sn), Some(0));
    assert_eq!(bob.phase(), SessionPhase::Running);

    // Resuming on the same clock finishes the exchange.
    let mut runs = 1;
    while !doist.run(&mut [&mut bob as &mut dyn Doer, &mut eve])?.all_done {
        runs += 1;
        assert!(runs < 10, "exchange did not finish");
    }
    assert_eq!(doist.tick(), 11);
    assert_exchanged(&bob, &eve);
    Ok(())
}

#[tokio::test]
async fn realtime_exchange() -> Result<()> {
    init_tracing();
    let (a, b) = memory::duplex();
    let (mut bob, mut eve) = pair(a, b)?;

    let mut doist = Doist::new(Duration::from_millis(5), Duration::from_secs(5));
    let report = doist
        .run_realtime(&mut [&mut bob as &mut dyn Doer, &mut eve])
        .await?;

    assert!(report.all_done);
    assert_exchanged(&bob, &eve);
    Ok(())
}
