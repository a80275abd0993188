//! Host-side driving of a [`Stage`]: a blocking command loop plus a
//! cloneable, `Send` handle for marshaling calls from other threads onto
//! the loop thread.
//!
//! The stage itself is single-threaded by contract; the runner owns it and
//! is the only place that touches it. Other threads interact through
//! [`RunnerHandle`], whose commands are applied between loop iterations.

use crossbeam_channel::{Receiver, Sender};

use sluice_core::{ComponentKey, Value};
use sluice_runtime::Stage;

/// Runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Keep the loop alive waiting for handle commands once the stage has
    /// settled, instead of returning.
    pub keep_alive: bool,
}

impl RunnerConfig {
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

enum Command {
    /// The stage's queues went from empty to non-empty.
    Wake,
    /// Run a closure on the loop thread.
    Call(Box<dyn FnOnce(&mut Stage) + Send>),
    Stop,
}

/// Owns a [`Stage`] and drives its loop, applying commands sent through
/// [`RunnerHandle`]s in between iterations.
pub struct Runner {
    stage: Stage,
    config: RunnerConfig,
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Runner {
    pub fn new(mut stage: Stage, config: RunnerConfig) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let wake_tx = tx.clone();
        stage.integrate(move || {
            let _ = wake_tx.send(Command::Wake);
        });
        Self {
            stage,
            config,
            tx,
            rx,
        }
    }

    /// A cloneable, `Send` handle for this runner.
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    /// Drain pending commands and drive the loop until the stage settles,
    /// without blocking. A stop request is honored only once the stage is
    /// settled; returns `true` if one arrived.
    pub fn run_until_settled(&mut self) -> bool {
        let mut stop = false;
        loop {
            while let Ok(command) = self.rx.try_recv() {
                stop |= self.apply(command);
            }
            if self.stage.is_settled() {
                return stop;
            }
            self.stage.iter();
        }
    }

    /// Run the loop to completion: drive rounds while work is pending,
    /// and (with `keep_alive`) block for handle commands when idle.
    /// Returns the stage when stopped or, without `keep_alive`, idle.
    #[tracing::instrument(skip(self))]
    pub fn run(mut self) -> Stage {
        loop {
            if self.run_until_settled() {
                break;
            }
            if !self.config.keep_alive {
                break;
            }
            match self.rx.recv() {
                Ok(command) => {
                    if self.apply(command) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        self.stage
    }

    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Wake => false,
            Command::Call(f) => {
                f(&mut self.stage);
                false
            }
            Command::Stop => true,
        }
    }
}

/// Sends work to a [`Runner`] from any thread.
#[derive(Clone)]
pub struct RunnerHandle {
    tx: Sender<Command>,
}

impl RunnerHandle {
    /// Run a closure on the loop thread. Returns `false` if the runner is
    /// gone.
    pub fn schedule(&self, f: impl FnOnce(&mut Stage) + Send + 'static) -> bool {
        self.tx.send(Command::Call(Box::new(f))).is_ok()
    }

    /// Invoke an action on the loop thread; failures are logged there.
    pub fn invoke(&self, comp: ComponentKey, action: &str, args: Vec<Value>) -> bool {
        let action = action.to_owned();
        self.schedule(move |stage| {
            if let Err(error) = stage.invoke(comp, &action, args) {
                tracing::error!(action = %action, %error, "remote invocation failed");
            }
        })
    }

    /// Ask the runner to return from [`Runner::run`].
    pub fn stop(&self) -> bool {
        self.tx.send(Command::Stop).is_ok()
    }
}
