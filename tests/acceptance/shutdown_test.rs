//! Shutdown acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - `stop()` returns within one recovery timeout plus one cycle, even while
//!   a recovery call is in flight
//! - Repeated start/stop cycles leave no thread or adapter behind
//! - Every stop returns all slaves to Init

use super::common::{fast_config, terminal_line, wait_for, Bench};
use ecat_master::SlaveState;
use std::time::{Duration, Instant};

const SLACK: Duration = Duration::from_millis(200);

#[test]
fn test_stop_latency_of_healthy_bus() {
    let mut bench = Bench::new(fast_config(), terminal_line(8));
    bench.master.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let stopping = Instant::now();
    bench.master.stop();
    let latency = stopping.elapsed();
    println!("Stop of a healthy bus took {latency:?}");

    // Init transition of the simulated slaves plus loop wakeup
    assert!(latency < Duration::from_millis(100) + SLACK);
    assert_eq!(bench.driver.last_broadcast(), Some(SlaveState::INIT));
}

#[test]
fn test_stop_latency_during_slow_recovery() {
    let config = fast_config();
    let bound = config.recovery_timeout + config.cycle_time + SLACK;
    let mut bench = Bench::new(config, terminal_line(4));
    bench.master.start().unwrap();

    bench.driver.set_blocking_recovery(true);
    bench.driver.disconnect(3);
    assert!(wait_for(Duration::from_secs(2), || bench.driver.recover_calls() >= 1));

    let stopping = Instant::now();
    bench.master.stop();
    let latency = stopping.elapsed();
    println!("Stop during recovery took {latency:?} (bound {bound:?})");
    assert!(latency < bound);
    assert!(!bench.driver.is_open());
}

#[test]
fn test_repeated_start_stop_cycles() {
    let mut bench = Bench::new(fast_config(), terminal_line(4));

    for cycle in 0..10 {
        bench.master.start().unwrap_or_else(|e| panic!("start {cycle} failed: {e}"));
        assert!(bench.master.is_running());
        assert!(wait_for(Duration::from_millis(200), || {
            bench.master.frame_stats().cycles > 0
        }));

        bench.master.stop();
        assert!(!bench.master.is_started());
        assert!(!bench.driver.is_open());
        for index in 1..=5 {
            assert_eq!(bench.driver.current_state(index), SlaveState::INIT);
        }
    }
}

#[test]
fn test_drop_while_degraded() {
    let Bench { driver, mut master } = Bench::new(fast_config(), terminal_line(2));
    master.start().unwrap();
    driver.force_state(2, SlaveState::INIT);
    assert!(wait_for(Duration::from_secs(1), || master.recovery_pending()));

    drop(master);
    assert!(!driver.is_open());
    assert_eq!(driver.last_broadcast(), Some(SlaveState::INIT));
}
