//! Recovery acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Several slaves failing at once are healed without stopping the bus
//! - A slave that was power cycled is reconfigured and rejoins
//! - Hooks re-apply slave configuration when a slave is pushed back to Op
//! - Healthy slaves keep exchanging process data throughout

use super::common::{fast_config, terminal_line, wait_for, Bench};
use ecat_master::{EthercatDriver, MasterHooks, SlaveHandle, SlaveState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HEAL_TIMEOUT: Duration = Duration::from_secs(3);

fn bus_is_healthy(bench: &Bench) -> bool {
    let master = &bench.master;
    let count = u16::try_from(master.slave_count()).unwrap();
    (1..=count).all(|i| master.slave_state(i) == SlaveState::OPERATIONAL)
        && (0..master.slave_count()).all(|i| master.is_online(i))
        && master.actual_wkc() == master.expected_wkc()
        && !master.recovery_pending()
}

#[test]
fn test_concurrent_faults_are_healed() {
    let mut bench = Bench::new(fast_config(), terminal_line(6));
    bench.master.start().unwrap();

    bench.driver.set_error(2, 0x001B);
    bench.driver.force_state(4, SlaveState::INIT);
    bench.driver.disconnect(6);
    assert!(wait_for(HEAL_TIMEOUT, || bench.driver.is_lost(6)));

    // Power cycled: the slave comes back in Init
    bench.driver.reconnect(6, SlaveState::INIT);

    assert!(wait_for(HEAL_TIMEOUT, || bus_is_healthy(&bench)), "bus did not heal");
    assert!(bench.master.is_running());

    let stats = bench.master.recovery_stats();
    println!("Recovery statistics: {stats:?}");
    assert_eq!(stats.acknowledged, 1);
    assert!(stats.reconfigurations >= 2);
    assert_eq!(stats.lost, 1);
    assert!(stats.safe_op_pushes >= 3);
}

#[test]
fn test_healthy_slaves_keep_exchanging() {
    let mut bench = Bench::new(fast_config(), terminal_line(4));
    bench.master.start().unwrap();

    bench.driver.disconnect(3);
    assert!(wait_for(HEAL_TIMEOUT, || bench.driver.is_lost(3)));

    let before = bench.master.frame_stats().cycles;
    std::thread::sleep(Duration::from_millis(100));
    let after = bench.master.frame_stats().cycles;
    assert!(after - before > 50, "only {} cycles while degraded", after - before);
    assert!(bench.master.is_running());
    assert!(bench.master.is_online(0));
    assert!(!bench.master.is_online(2));

    bench.driver.reconnect(3, SlaveState::SAFE_OPERATIONAL);
    assert!(wait_for(HEAL_TIMEOUT, || bus_is_healthy(&bench)));
}

#[test]
fn test_repeated_errors_on_one_slave() {
    let mut bench = Bench::new(fast_config(), terminal_line(2));
    bench.master.start().unwrap();

    for round in 1..=5 {
        bench.driver.set_error(3, 0x001A);
        assert!(wait_for(HEAL_TIMEOUT, || bench.master.recovery_pending()));
        assert!(wait_for(HEAL_TIMEOUT, || bus_is_healthy(&bench)), "round {round} did not heal");
    }
    assert_eq!(bench.master.recovery_stats().acknowledged, 5);
}

/// Re-applies a watchdog setting whenever a slave is pushed to Operational.
struct Reapply {
    pushes: AtomicU64,
}

impl MasterHooks for Reapply {
    fn on_safe_operational(&self, slave: &SlaveHandle<'_>) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        slave.sdo_write(0x10F1, 2, &[100, 0]).unwrap();
    }
}

#[test]
fn test_hooks_reapply_configuration() {
    let hooks = Arc::new(Reapply {
        pushes: AtomicU64::new(0),
    });
    let bench = Bench::new(fast_config(), terminal_line(2));
    for slave in 1..=3 {
        bench.driver.set_object(slave, 0x10F1, 2, &[0, 0]);
    }
    let driver = Arc::clone(&bench.driver);
    let mut master = bench.master.with_hooks(hooks.clone());

    master.start().unwrap();
    assert_eq!(hooks.pushes.load(Ordering::Relaxed), 3);

    // Output terminal: its work counter share drops in SafeOp
    driver.set_object(3, 0x10F1, 2, &[0, 0]);
    driver.force_state(3, SlaveState::SAFE_OPERATIONAL);
    assert!(wait_for(HEAL_TIMEOUT, || {
        master.slave_state(3) == SlaveState::OPERATIONAL && !master.recovery_pending()
    }));

    assert_eq!(hooks.pushes.load(Ordering::Relaxed), 4);
    assert_eq!(driver.object(3, 0x10F1, 2), Some(vec![100, 0]));
    master.stop();
}
