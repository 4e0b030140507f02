//! In-memory EtherCAT bus for tests and hardware-less runs.
//!
//! Slaves follow state requests after a configurable delay, refuse states
//! above their highest reachable state, produce a realistic work counter and
//! echo their outputs back as inputs while Operational. Faults (disconnects,
//! SafeOp+Error, work counter glitches, slow recovery) can be injected at any
//! time from another thread.

use crate::driver::EthercatDriver;
use crate::io_map::IoMap;
use crate::slave::{sdo_addresses, SlaveIdentity, SlaveInfo};
use crate::state::SlaveState;
use ecat_common::{SimulatedSlaveConfig, SimulationConfig};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// AL status code set when a slave refuses a requested state.
const AL_INVALID_STATE_CHANGE: u16 = 0x0011;

/// Poll period of blocking state checks.
const POLL_PERIOD: Duration = Duration::from_millis(1);

/// Description of one simulated slave.
#[derive(Debug, Clone)]
pub struct SimulatedSlave {
    /// Device name.
    pub name: String,
    /// Vendor/product/revision.
    pub identity: SlaveIdentity,
    /// Input bytes (slave → master).
    pub input_bytes: usize,
    /// Output bytes (master → slave).
    pub output_bytes: usize,
    /// Distributed clock support.
    pub dc_supported: bool,
    /// Time to complete a state transition.
    pub transition_delay: Duration,
    /// Highest state the slave accepts.
    pub max_state: SlaveState,
    /// Process data group.
    pub group: u8,
}

impl SimulatedSlave {
    /// A slave without process data that reaches Operational after 10 ms.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: SlaveIdentity::new(0x0000_0002, 0, 1),
            input_bytes: 0,
            output_bytes: 0,
            dc_supported: true,
            transition_delay: Duration::from_millis(10),
            max_state: SlaveState::OPERATIONAL,
            group: 0,
        }
    }

    /// Set the process data sizes in bytes.
    pub fn with_io(mut self, input_bytes: usize, output_bytes: usize) -> Self {
        self.input_bytes = input_bytes;
        self.output_bytes = output_bytes;
        self
    }

    /// Set the transition delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = delay;
        self
    }

    /// Cap the reachable state; higher requests are refused.
    pub fn with_max_state(mut self, state: SlaveState) -> Self {
        self.max_state = state;
        self
    }

    /// Set distributed clock support.
    pub fn with_dc(mut self, supported: bool) -> Self {
        self.dc_supported = supported;
        self
    }

    /// Set the identity.
    pub fn with_identity(mut self, identity: SlaveIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Move the slave into another process data group.
    pub fn with_group(mut self, group: u8) -> Self {
        self.group = group;
        self
    }
}

impl From<&SimulatedSlaveConfig> for SimulatedSlave {
    fn from(config: &SimulatedSlaveConfig) -> Self {
        Self::new(config.name.clone())
            .with_io(config.input_bytes, config.output_bytes)
            .with_dc(config.dc_supported)
            .with_delay(config.transition_delay)
    }
}

#[derive(Debug)]
struct SlaveSim {
    profile: SimulatedSlave,
    state: SlaveState,
    pending: Option<(SlaveState, Instant)>,
    al_status: u16,
    present: bool,
    lost: bool,
}

impl SlaveSim {
    fn new(profile: SimulatedSlave) -> Self {
        Self {
            profile,
            state: SlaveState::NONE,
            pending: None,
            al_status: 0,
            present: true,
            lost: false,
        }
    }

    fn request(&mut self, target: SlaveState, now: Instant) {
        if self.present {
            self.pending = Some((target, now + self.profile.transition_delay));
        }
    }

    fn settle(&mut self, now: Instant) {
        let Some((target, due)) = self.pending else {
            return;
        };
        if now < due {
            return;
        }
        self.pending = None;

        if target.has_error() {
            // Acknowledge: drop the error indication, keep the state
            self.state = self.state.without_error();
            self.al_status = 0;
        } else if target <= self.profile.max_state {
            self.state = target;
            self.al_status = 0;
        } else {
            self.al_status = AL_INVALID_STATE_CHANGE;
        }
    }

    fn base_state(&self) -> SlaveState {
        self.state.without_error()
    }
}

#[derive(Debug)]
struct Bus {
    open: bool,
    slaves: Vec<SlaveSim>,
    dc_configured: bool,
    dc_time: i64,
    wkc_fault_cycles: u32,
    last_broadcast: Option<SlaveState>,
    blocking_recovery: bool,
    objects: BTreeMap<(u16, u16, u8), Vec<u8>>,
}

impl Bus {
    fn slave_mut(&mut self, index: u16) -> Option<&mut SlaveSim> {
        usize::from(index)
            .checked_sub(1)
            .and_then(move |i| self.slaves.get_mut(i))
    }

    fn slave(&self, index: u16) -> Option<&SlaveSim> {
        usize::from(index)
            .checked_sub(1)
            .and_then(|i| self.slaves.get(i))
    }

    fn settle(&mut self) {
        let now = Instant::now();
        for slave in &mut self.slaves {
            slave.settle(now);
        }
    }

    /// Lowest state of all slaves, with the error bit if any slave reports one.
    fn aggregate(&self) -> SlaveState {
        let lowest = self
            .slaves
            .iter()
            .map(SlaveSim::base_state)
            .min()
            .unwrap_or(SlaveState::NONE);
        if self.slaves.iter().any(|s| s.state.has_error()) {
            lowest | SlaveState::ERROR
        } else {
            lowest
        }
    }

    fn state_of(&self, index: u16) -> SlaveState {
        if index == 0 {
            self.aggregate()
        } else {
            self.slave(index).map_or(SlaveState::NONE, |s| s.state)
        }
    }
}

/// Fully in-memory [`EthercatDriver`].
#[derive(Debug)]
pub struct SimulatedDriver {
    adapter: Option<String>,
    cycle_time: Duration,
    bus: Mutex<Bus>,
    io: Mutex<IoMap>,
    fail_adapter: Mutex<Option<String>>,
    reconfigure_calls: AtomicU64,
    recover_calls: AtomicU64,
    state_writes: AtomicU64,
    cycles: AtomicU64,
}

impl SimulatedDriver {
    /// Create a bus with the given slaves, accepting any adapter name.
    pub fn new(slaves: Vec<SimulatedSlave>) -> Self {
        let mut objects = BTreeMap::new();
        for (i, profile) in slaves.iter().enumerate() {
            let index = u16::try_from(i + 1).unwrap_or(u16::MAX);
            let addr = |a: crate::slave::SdoAddress| (index, a.index, a.subindex);
            objects.insert(addr(sdo_addresses::DEVICE_NAME), profile.name.as_bytes().to_vec());
            objects.insert(addr(sdo_addresses::DEVICE_TYPE), 0x0000_1389_u32.to_le_bytes().to_vec());
            objects.insert(addr(sdo_addresses::ERROR_REGISTER), vec![0]);
            objects.insert(addr(sdo_addresses::VENDOR_ID), profile.identity.vendor_id.to_le_bytes().to_vec());
            objects.insert(
                addr(sdo_addresses::PRODUCT_CODE),
                profile.identity.product_code.to_le_bytes().to_vec(),
            );
        }

        Self {
            adapter: None,
            cycle_time: Duration::from_millis(1),
            bus: Mutex::new(Bus {
                open: false,
                slaves: slaves.into_iter().map(SlaveSim::new).collect(),
                dc_configured: false,
                dc_time: 1_000_000_000,
                wkc_fault_cycles: 0,
                last_broadcast: None,
                blocking_recovery: false,
                objects,
            }),
            io: Mutex::new(IoMap::default()),
            fail_adapter: Mutex::new(None),
            reconfigure_calls: AtomicU64::new(0),
            recover_calls: AtomicU64::new(0),
            state_writes: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    /// Create a bus from the daemon's simulation settings.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.slaves.iter().map(SimulatedSlave::from).collect())
            .with_adapter(config.adapter.clone())
    }

    /// Only accept `adapter` in [`EthercatDriver::init_adapter`].
    #[must_use]
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// Advance the DC clock by `cycle_time` per received frame.
    #[must_use]
    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    fn bus(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io(&self) -> MutexGuard<'_, IoMap> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Fault injection

    /// Make the next `init_adapter` calls fail with `reason` (`None` to clear).
    pub fn fail_adapter(&self, reason: Option<&str>) {
        *self.fail_adapter.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    /// Unplug a slave: it stops answering and reports `NONE`.
    pub fn disconnect(&self, index: u16) {
        if let Some(slave) = self.bus().slave_mut(index) {
            slave.present = false;
            slave.state = SlaveState::NONE;
            slave.pending = None;
        }
    }

    /// Plug a slave back in, reporting `state`.
    pub fn reconnect(&self, index: u16, state: SlaveState) {
        if let Some(slave) = self.bus().slave_mut(index) {
            slave.present = true;
            slave.state = state;
            slave.pending = None;
        }
    }

    /// Overwrite the state of a slave, cancelling any pending transition.
    pub fn force_state(&self, index: u16, state: SlaveState) {
        if let Some(slave) = self.bus().slave_mut(index) {
            slave.state = state;
            slave.pending = None;
        }
    }

    /// Drop a slave to SafeOp+Error with the given AL status code.
    pub fn set_error(&self, index: u16, al_status: u16) {
        if let Some(slave) = self.bus().slave_mut(index) {
            slave.state = SlaveState::SAFE_OPERATIONAL | SlaveState::ERROR;
            slave.al_status = al_status;
            slave.pending = None;
        }
    }

    /// Report a work counter one below the real value for the next `cycles` frames.
    pub fn inject_wkc_fault(&self, cycles: u32) {
        self.bus().wkc_fault_cycles = cycles;
    }

    /// Make reconfigure/recover calls block for their full timeout and fail.
    pub fn set_blocking_recovery(&self, blocking: bool) {
        self.bus().blocking_recovery = blocking;
    }

    /// Add or replace an object in a slave's dictionary.
    pub fn set_object(&self, slave: u16, index: u16, subindex: u8, data: &[u8]) {
        self.bus().objects.insert((slave, index, subindex), data.to_vec());
    }

    // Observers

    /// Content of an object in a slave's dictionary.
    pub fn object(&self, slave: u16, index: u16, subindex: u8) -> Option<Vec<u8>> {
        self.bus().objects.get(&(slave, index, subindex)).cloned()
    }

    /// Returns true while the adapter is open.
    pub fn is_open(&self) -> bool {
        self.bus().open
    }

    /// Current raw state of a slave, including slaves on a closed bus.
    pub fn current_state(&self, index: u16) -> SlaveState {
        let mut bus = self.bus();
        bus.settle();
        bus.state_of(index)
    }

    /// Last state requested for all slaves.
    pub fn last_broadcast(&self) -> Option<SlaveState> {
        self.bus().last_broadcast
    }

    /// Number of `reconfigure_slave` calls.
    pub fn reconfigure_calls(&self) -> u64 {
        self.reconfigure_calls.load(Ordering::Relaxed)
    }

    /// Number of `recover_slave` calls.
    pub fn recover_calls(&self) -> u64 {
        self.recover_calls.load(Ordering::Relaxed)
    }

    /// Number of `write_state` calls.
    pub fn state_writes(&self) -> u64 {
        self.state_writes.load(Ordering::Relaxed)
    }

    /// Number of received process data frames.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Sleep outside the bus lock when slow recovery is simulated.
    fn recovery_blocked(&self, timeout: Duration) -> bool {
        let blocking = self.bus().blocking_recovery;
        if blocking {
            thread::sleep(timeout);
        }
        blocking
    }
}

impl EthercatDriver for SimulatedDriver {
    fn init_adapter(&self, adapter: &str) -> Result<(), String> {
        if let Some(reason) = self.fail_adapter.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(reason);
        }
        if self.adapter.as_deref().is_some_and(|a| a != adapter) {
            return Err(format!("no such device: {adapter}"));
        }

        let mut bus = self.bus();
        bus.open = true;
        bus.dc_configured = false;
        bus.wkc_fault_cycles = 0;
        bus.last_broadcast = None;
        for slave in &mut bus.slaves {
            slave.pending = None;
            slave.al_status = 0;
            slave.lost = false;
            if slave.present {
                slave.state = SlaveState::INIT;
            }
        }
        debug!(adapter, "Simulated adapter opened");
        Ok(())
    }

    fn configure_slaves(&self) -> usize {
        let mut bus = self.bus();
        if !bus.open {
            return 0;
        }
        let now = Instant::now();
        for slave in &mut bus.slaves {
            slave.request(SlaveState::PRE_OPERATIONAL, now);
        }
        bus.slaves.len()
    }

    fn configure_dc(&self) -> bool {
        let mut bus = self.bus();
        bus.dc_configured = bus.slaves.iter().any(|s| s.profile.dc_supported);
        bus.dc_configured
    }

    fn map_process_data(&self) -> usize {
        let map = {
            let mut bus = self.bus();
            if !bus.open {
                return 0;
            }
            let now = Instant::now();
            for slave in &mut bus.slaves {
                slave.request(SlaveState::SAFE_OPERATIONAL, now);
            }
            IoMap::new(bus.slaves.iter().map(|s| (s.profile.input_bytes, s.profile.output_bytes)))
        };
        let mapped = map.mapped_bytes();
        *self.io() = map;
        mapped
    }

    fn send_process_data(&self) {}

    fn receive_process_data(&self, _timeout: Duration) -> i32 {
        let (wkc, echo) = {
            let mut bus = self.bus();
            if !bus.open {
                return 0;
            }
            bus.settle();
            bus.dc_time += i64::try_from(self.cycle_time.as_nanos()).unwrap_or(0);

            let mut wkc = 0_i32;
            let mut echo = Vec::new();
            for (i, slave) in bus.slaves.iter().enumerate() {
                if !slave.present || slave.profile.group != 0 {
                    continue;
                }
                let base = slave.base_state();
                if base >= SlaveState::SAFE_OPERATIONAL && slave.profile.input_bytes > 0 {
                    wkc += 1;
                }
                if base == SlaveState::OPERATIONAL {
                    if slave.profile.output_bytes > 0 {
                        wkc += 2;
                    }
                    echo.push(u16::try_from(i + 1).unwrap_or(u16::MAX));
                }
            }
            if bus.wkc_fault_cycles > 0 {
                bus.wkc_fault_cycles -= 1;
                wkc -= 1;
            }
            (wkc, echo)
        };

        let mut io = self.io();
        for index in echo {
            let outputs = io.outputs(index).to_vec();
            let inputs = io.inputs_mut(index);
            let n = inputs.len().min(outputs.len());
            inputs[..n].copy_from_slice(&outputs[..n]);
        }
        drop(io);

        self.cycles.fetch_add(1, Ordering::Relaxed);
        trace!(wkc, "Simulated process data frame");
        wkc
    }

    fn read_states(&self) -> SlaveState {
        let mut bus = self.bus();
        bus.settle();
        bus.aggregate()
    }

    fn slave_state(&self, index: u16) -> SlaveState {
        let mut bus = self.bus();
        bus.settle();
        bus.state_of(index)
    }

    fn write_state(&self, index: u16, state: SlaveState) {
        self.state_writes.fetch_add(1, Ordering::Relaxed);
        let mut bus = self.bus();
        if !bus.open {
            return;
        }
        let now = Instant::now();
        if index == 0 {
            bus.last_broadcast = Some(state);
            for slave in &mut bus.slaves {
                slave.request(state, now);
            }
        } else if let Some(slave) = bus.slave_mut(index) {
            slave.request(state, now);
        }
    }

    fn check_state(&self, index: u16, state: SlaveState, timeout: Duration) -> SlaveState {
        let deadline = Instant::now() + timeout;
        loop {
            let observed = self.slave_state(index);
            if observed == state {
                return observed;
            }
            let now = Instant::now();
            if now >= deadline {
                return observed;
            }
            thread::sleep((deadline - now).min(POLL_PERIOD));
        }
    }

    fn reconfigure_slave(&self, index: u16, timeout: Duration) -> bool {
        self.reconfigure_calls.fetch_add(1, Ordering::Relaxed);
        if self.recovery_blocked(timeout) {
            return false;
        }
        let mut bus = self.bus();
        match bus.slave_mut(index) {
            Some(slave) if slave.present => {
                slave.state = SlaveState::SAFE_OPERATIONAL.min(slave.profile.max_state);
                slave.al_status = 0;
                slave.pending = None;
                true
            }
            _ => false,
        }
    }

    fn recover_slave(&self, index: u16, timeout: Duration) -> bool {
        self.recover_calls.fetch_add(1, Ordering::Relaxed);
        if self.recovery_blocked(timeout) {
            return false;
        }
        self.bus().slave(index).is_some_and(|s| s.present)
    }

    fn is_lost(&self, index: u16) -> bool {
        self.bus().slave(index).is_some_and(|s| s.lost)
    }

    fn set_lost(&self, index: u16, lost: bool) {
        if let Some(slave) = self.bus().slave_mut(index) {
            slave.lost = lost;
        }
    }

    fn slave_count(&self) -> usize {
        let bus = self.bus();
        if bus.open {
            bus.slaves.len()
        } else {
            0
        }
    }

    fn slave_info(&self, index: u16) -> Option<SlaveInfo> {
        let mut bus = self.bus();
        bus.settle();
        let slave = bus.slave(index)?;
        let mut info = SlaveInfo::new(index, slave.profile.name.clone());
        info.identity = slave.profile.identity;
        info.group = slave.profile.group;
        info.input_bits = u32::try_from(slave.profile.input_bytes * 8).unwrap_or(u32::MAX);
        info.output_bits = u32::try_from(slave.profile.output_bytes * 8).unwrap_or(u32::MAX);
        info.dc_supported = slave.profile.dc_supported;
        info.propagation_delay_ns = i32::from(index) * 100;
        info.state = slave.state;
        info.al_status_code = slave.al_status;
        info.lost = slave.lost;
        Some(info)
    }

    fn group_work_counters(&self, group: u8) -> (u16, u16) {
        let bus = self.bus();
        let in_group = || bus.slaves.iter().filter(|s| s.profile.group == group);
        let outputs = in_group().filter(|s| s.profile.output_bytes > 0).count();
        let inputs = in_group().filter(|s| s.profile.input_bytes > 0).count();
        (
            u16::try_from(outputs).unwrap_or(u16::MAX),
            u16::try_from(inputs).unwrap_or(u16::MAX),
        )
    }

    fn with_io_map(&self, f: &mut dyn FnMut(&mut IoMap)) {
        f(&mut self.io());
    }

    fn sdo_read(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        complete_access: bool,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, String> {
        let bus = self.bus();
        mailbox_ready(&bus, slave)?;

        let data: Vec<u8> = if complete_access {
            bus.objects
                .range((slave, index, subindex)..=(slave, index, u8::MAX))
                .flat_map(|(_, v)| v.iter().copied())
                .collect()
        } else {
            bus.objects
                .get(&(slave, index, subindex))
                .cloned()
                .unwrap_or_default()
        };
        if data.is_empty() && !bus.objects.contains_key(&(slave, index, subindex)) {
            return Err(format!("object {index:#06x}:{subindex} does not exist"));
        }
        let capacity = buf.len();
        let target = buf
            .get_mut(..data.len())
            .ok_or_else(|| format!("object is {} bytes, buffer holds {capacity}", data.len()))?;
        target.copy_from_slice(&data);
        Ok(data.len())
    }

    fn sdo_write(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        _complete_access: bool,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), String> {
        let mut bus = self.bus();
        mailbox_ready(&bus, slave)?;
        match bus.objects.get_mut(&(slave, index, subindex)) {
            Some(value) => {
                *value = data.to_vec();
                Ok(())
            }
            None => Err(format!("object {index:#06x}:{subindex} does not exist")),
        }
    }

    fn dc_time(&self) -> i64 {
        self.bus().dc_time
    }

    fn close(&self) {
        let mut bus = self.bus();
        if bus.open {
            bus.open = false;
            debug!("Simulated adapter closed");
        }
    }
}

fn mailbox_ready(bus: &Bus, slave: u16) -> Result<(), String> {
    if !bus.open {
        return Err("adapter closed".into());
    }
    match bus.slave(slave) {
        None => Err(format!("slave {slave} does not exist")),
        Some(s) if !s.present => Err(format!("slave {slave} does not respond")),
        Some(s) if s.base_state() < SlaveState::PRE_OPERATIONAL => {
            Err(format!("mailbox of slave {slave} not available in {}", s.state))
        }
        Some(_) => Ok(()),
    }
}
