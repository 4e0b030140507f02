//! Cyclic process data exchange.

use crate::driver::EthercatDriver;
use crate::hooks::MasterHooks;
use crate::session::BusSession;
use crate::task::StopFlag;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Exchanges one process data frame per cycle while the bus is operational.
///
/// This loop is the only writer of the actual work counter and never
/// attempts any recovery itself.
pub struct ProcessDataLoop {
    driver: Arc<dyn EthercatDriver>,
    session: Arc<BusSession>,
    hooks: Arc<dyn MasterHooks>,
    cycle_time: Duration,
    receive_timeout: Duration,
}

impl ProcessDataLoop {
    /// Create the loop for one session.
    pub fn new(
        driver: Arc<dyn EthercatDriver>,
        session: Arc<BusSession>,
        hooks: Arc<dyn MasterHooks>,
        cycle_time: Duration,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            session,
            hooks,
            cycle_time,
            receive_timeout,
        }
    }

    /// Run until `stop` is raised. A cycle in progress is always completed.
    pub fn run(self, stop: &StopFlag) {
        debug!(
            master = %self.session.name(),
            cycle_us = self.cycle_time.as_micros(),
            "Process data loop running"
        );
        let mut deadline = Instant::now();

        while !stop.is_raised() {
            if !self.session.is_operational() {
                stop.sleep(self.cycle_time);
                deadline = Instant::now();
                continue;
            }

            self.cycle();

            deadline += self.cycle_time;
            let now = Instant::now();
            if deadline < now {
                // Overrun: start the next cycle immediately without catching up
                deadline = now;
            }
            stop.sleep_until(deadline);
        }

        debug!(
            master = %self.session.name(),
            cycles = self.session.frame_stats().cycles,
            "Process data loop stopped"
        );
    }

    fn cycle(&self) {
        let hooks = &self.hooks;
        self.driver.with_io_map(&mut |io| hooks.on_process(io));

        let sent = Instant::now();
        self.driver.send_process_data();
        let wkc = self.driver.receive_process_data(self.receive_timeout);
        self.session.record_cycle(wkc, sent.elapsed());

        let expected = self.session.expected_wkc();
        if wkc != expected {
            trace!(master = %self.session.name(), expected, actual = wkc, "Work counter mismatch");
        }
    }
}
