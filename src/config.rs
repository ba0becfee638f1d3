use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Largest fiber pool accepted by [`Config::validate`].
pub const MAX_FIBERS: usize = 1 << 16;

/// Smallest per-fiber stack accepted by [`Config::validate`].
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// How a caller blocked on a [`TaskFuture`](crate::task::TaskFuture) waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Busy-wait with CPU pause hints. The waiting thread never gives up its
    /// core; use [`Park`](WaitStrategy::Park) for long waits.
    #[default]
    Spin,
    /// Park the waiting thread on a condition variable.
    Park,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: Option<usize>,
    pub fiber_capacity: usize,
    pub fiber_stack_size: usize,
    pub queue_capacity: usize,
    pub thread_name_prefix: String,
    pub pin_workers: bool,
    pub wait_strategy: WaitStrategy,
    pub panic_strategy: PanicStrategy,
    pub idle_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            fiber_capacity: 128,
            fiber_stack_size: 256 * 1024,
            queue_capacity: 4096,
            thread_name_prefix: "weft-worker".to_string(),
            pin_workers: false,
            wait_strategy: WaitStrategy::default(),
            panic_strategy: PanicStrategy::default(),
            idle_wait: Duration::from_millis(1),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.fiber_capacity == 0 || !self.fiber_capacity.is_power_of_two() {
            return Err(Error::config(format!(
                "fiber_capacity must be a non-zero power of two, got {}",
                self.fiber_capacity
            )));
        }
        if self.fiber_capacity > MAX_FIBERS {
            return Err(Error::config(format!(
                "fiber_capacity too large (max {})",
                MAX_FIBERS
            )));
        }

        if self.fiber_stack_size < MIN_STACK_SIZE {
            return Err(Error::config(format!(
                "fiber_stack_size must be at least {} bytes",
                MIN_STACK_SIZE
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }

        if self.idle_wait.is_zero() {
            return Err(Error::config("idle_wait must be non-zero"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn fiber_capacity(mut self, capacity: usize) -> Self {
        self.config.fiber_capacity = capacity;
        self
    }

    pub fn fiber_stack_size(mut self, size: usize) -> Self {
        self.config.fiber_stack_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.config.wait_strategy = strategy;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.config.idle_wait = wait;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
