//! Startup acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A configured bus reaches Operational well within the stage timeouts
//! - The expected work counter matches the mapped topology
//! - A slave that cannot reach Operational fails the start and leaves the
//!   whole bus in Init with the adapter closed

use super::common::{fast_config, terminal_line, terminal_line_wkc, wait_for, Bench};
use ecat_common::{MasterError, RuntimeConfig};
use ecat_master::{SimulatedSlave, SlaveState};
use std::time::{Duration, Instant};

const LINE_CONFIG: &str = r#"
    [master]
    name = "line-1"
    cycle_time = "1ms"
    error_cycle_time = "20ms"

    [master.timeouts]
    operational = "2s"

    [simulation]
    adapter = "sim0"

    [[simulation.slaves]]
    name = "EK1100"
    dc_supported = false

    [[simulation.slaves]]
    name = "EL1008"
    input_bytes = 1

    [[simulation.slaves]]
    name = "EL2008"
    output_bytes = 1
    transition_delay = "30ms"

    [[simulation.slaves]]
    name = "EL3102"
    input_bytes = 4
"#;

#[test]
fn test_startup_from_toml() {
    let config = RuntimeConfig::from_toml(LINE_CONFIG).unwrap();
    let mut bench = Bench::from_runtime(&config);

    let started = Instant::now();
    bench.master.start().unwrap();
    let startup = started.elapsed();
    println!("Startup of 4 slaves took {startup:?}");
    assert!(startup < Duration::from_secs(1));

    let master = &bench.master;
    assert!(master.is_running());
    assert_eq!(master.slave_count(), 4);
    // One output terminal, two input terminals
    assert_eq!(master.expected_wkc(), 4);
    assert!(wait_for(Duration::from_millis(200), || master.actual_wkc() == 4));
    assert_eq!(master.slave_name(3).as_deref(), Some("EL2008"));
    assert!(!master.slave_has_distributed_clock(1));
    assert!(master.has_distributed_clock());
    for index in 1..=4 {
        assert_eq!(master.slave_state(index), SlaveState::OPERATIONAL);
    }

    bench.master.stop();
    assert!(!bench.driver.is_open());
}

#[test]
fn test_startup_of_long_terminal_line() {
    let terminals = 31;
    let mut bench = Bench::new(fast_config(), terminal_line(terminals));

    bench.master.start().unwrap();
    assert_eq!(bench.master.slave_count(), terminals + 1);
    assert_eq!(bench.master.expected_wkc(), terminal_line_wkc(terminals));
    assert!(wait_for(Duration::from_millis(500), || {
        bench.master.actual_wkc() == bench.master.expected_wkc()
    }));
    assert!((0..=terminals).all(|i| bench.master.is_online(i)));
}

#[test]
fn test_frozen_terminal_rolls_back_the_line() {
    let mut slaves = terminal_line(6);
    slaves[4] = SimulatedSlave::new("EL2008 frozen")
        .with_io(0, 1)
        .with_max_state(SlaveState::SAFE_OPERATIONAL);
    let mut bench = Bench::new(fast_config(), slaves);

    let err = bench.master.start().unwrap_err();
    let MasterError::NotOperational { diagnostics } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].index, 5);
    assert_eq!(diagnostics[0].state, SlaveState::SAFE_OPERATIONAL.raw());
    assert_eq!(diagnostics[0].status_code, 0x0011);
    assert!(err
        .to_string()
        .contains("slave 5 state=0x04 status=0x0011: Invalid requested state change"));

    assert!(!bench.master.is_started());
    assert!(!bench.driver.is_open());
    for index in 1..=7 {
        assert_eq!(bench.driver.current_state(index), SlaveState::INIT);
    }
}

#[test]
fn test_slow_slave_within_timeout() {
    let mut config = fast_config();
    config.timeouts.operational = Duration::from_secs(2);
    let mut bench = Bench::new(
        config,
        vec![
            SimulatedSlave::new("EL1008").with_io(1, 0),
            SimulatedSlave::new("EL6751 gateway")
                .with_io(8, 8)
                .with_delay(Duration::from_millis(300)),
        ],
    );

    let started = Instant::now();
    bench.master.start().unwrap();
    // PreOp, SafeOp and Op each take one transition delay
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(bench.master.is_running());
}
