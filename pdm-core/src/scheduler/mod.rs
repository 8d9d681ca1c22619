//! Cooperative task model.
//!
//! Every task is a resumable state machine: [`Task::resume`] runs from the
//! saved phase until the next suspension point and reports what happened as
//! a [`Step`]. Tasks never jump back to their entry point themselves; they
//! return [`Step::Restart`] and the owning [`TaskSlot`] performs the reset,
//! so self-triggered recovery and externally forced restarts go through the
//! same path.
//!
//! A restart only rewinds task-local progress. Actuators are brought back to
//! their safe state by the task's entry phase on the next pass, which is why
//! every entry phase starts with its safe-state writes.

use crate::state::VehicleState;
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::timer::TimerBank;

/// Result of one resume call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Voluntarily gave up the loop; will continue from the next point.
    Yielded,
    /// Waiting on a timer or a condition.
    Blocked,
    /// Reached the terminal point.
    Finished,
    /// Asked to be rewound to its entry point.
    Restart,
}

/// What a slot does with a task that reached its terminal point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OnFinish {
    /// Begin again from entry on the next pass.
    Rerun,
    /// Stay terminal until [`Runnable::force_restart`] is called.
    Hold,
}

/// Everything a task may read or write during a pass.
pub struct Context<'a, H: ?Sized> {
    pub io: &'a mut H,
    pub timers: &'a TimerBank,
    pub state: &'a mut VehicleState,
    pub telemetry: &'a mut TelemetryRecorder,
}

impl<H: ?Sized> Context<'_, H> {
    /// Records a telemetry event stamped with the current uptime.
    pub fn record(&mut self, event: TelemetryEvent) {
        let now = self.timers.now_ms();
        self.telemetry.record(event, now);
    }
}

/// A resumable unit of logic.
pub trait Task<H: ?Sized> {
    fn name(&self) -> &'static str;

    /// Runs until the next suspension point.
    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step;

    /// Rewinds to the entry phase, discarding per-run locals. Latches the
    /// entry phase does not clear (timers, historical flags) survive.
    fn restart(&mut self);
}

/// Object-safe face of a [`TaskSlot`], used to build the pass order.
pub trait Runnable<H: ?Sized> {
    fn name(&self) -> &'static str;

    fn run(&mut self, cx: &mut Context<'_, H>) -> Step;

    /// Discards all progress; the next run starts at entry.
    fn force_restart(&mut self, cx: &mut Context<'_, H>);

    fn is_finished(&self) -> bool;
}

/// Wraps a task with its restart and terminal bookkeeping.
pub struct TaskSlot<T> {
    task: T,
    on_finish: OnFinish,
    finished: bool,
}

impl<T> TaskSlot<T> {
    pub const fn new(task: T, on_finish: OnFinish) -> Self {
        Self {
            task,
            on_finish,
            finished: false,
        }
    }

    /// Slot for a task that loops forever (or self-resets).
    pub const fn cyclic(task: T) -> Self {
        Self::new(task, OnFinish::Rerun)
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<H: ?Sized, T: Task<H>> Runnable<H> for TaskSlot<T> {
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn run(&mut self, cx: &mut Context<'_, H>) -> Step {
        if self.finished {
            match self.on_finish {
                OnFinish::Hold => return Step::Finished,
                OnFinish::Rerun => {
                    self.task.restart();
                    self.finished = false;
                }
            }
        }

        let step = self.task.resume(cx);
        match step {
            Step::Restart => self.task.restart(),
            Step::Finished => self.finished = true,
            Step::Yielded | Step::Blocked => {}
        }
        step
    }

    fn force_restart(&mut self, cx: &mut Context<'_, H>) {
        self.task.restart();
        self.finished = false;
        cx.record(TelemetryEvent::TaskRestarted(self.task.name()));
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Runs every task once, in slice order.
pub fn run_pass<H: ?Sized>(tasks: &mut [&mut dyn Runnable<H>], cx: &mut Context<'_, H>) {
    for task in tasks.iter_mut() {
        task.run(cx);
    }
}

/// Force-restarts every task in the slice.
pub fn restart_all<H: ?Sized>(tasks: &mut [&mut dyn Runnable<H>], cx: &mut Context<'_, H>) {
    for task in tasks.iter_mut() {
        task.force_restart(cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        resumes: u32,
        restarts: u32,
        phase: u8,
        finish_at: u8,
    }

    impl Task<()> for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn resume(&mut self, _cx: &mut Context<'_, ()>) -> Step {
            self.resumes += 1;
            self.phase += 1;
            if self.phase >= self.finish_at {
                Step::Finished
            } else {
                Step::Yielded
            }
        }

        fn restart(&mut self) {
            self.restarts += 1;
            self.phase = 0;
        }
    }

    struct Harness {
        timers: TimerBank,
        state: VehicleState,
        telemetry: TelemetryRecorder,
        io: (),
    }

    impl Harness {
        fn new() -> Self {
            Self {
                timers: TimerBank::new(),
                state: VehicleState::new(),
                telemetry: TelemetryRecorder::new(),
                io: (),
            }
        }

        fn cx(&mut self) -> Context<'_, ()> {
            Context {
                io: &mut self.io,
                timers: &self.timers,
                state: &mut self.state,
                telemetry: &mut self.telemetry,
            }
        }
    }

    #[test]
    fn finished_task_reruns_from_entry() {
        let mut harness = Harness::new();
        let mut slot = TaskSlot::cyclic(Counter {
            finish_at: 2,
            ..Counter::default()
        });

        assert_eq!(slot.run(&mut harness.cx()), Step::Yielded);
        assert_eq!(slot.run(&mut harness.cx()), Step::Finished);
        assert!(slot.is_finished());
        assert_eq!(slot.run(&mut harness.cx()), Step::Yielded);
        assert_eq!(slot.task().restarts, 1);
    }

    #[test]
    fn held_task_waits_for_external_restart() {
        let mut harness = Harness::new();
        let mut slot = TaskSlot::new(
            Counter {
                finish_at: 1,
                ..Counter::default()
            },
            OnFinish::Hold,
        );

        assert_eq!(slot.run(&mut harness.cx()), Step::Finished);
        assert_eq!(slot.run(&mut harness.cx()), Step::Finished);
        assert_eq!(slot.task().resumes, 1, "held task must not resume");

        slot.force_restart(&mut harness.cx());
        assert_eq!(slot.run(&mut harness.cx()), Step::Finished);
        assert_eq!(slot.task().resumes, 2);
        assert!(
            harness
                .telemetry
                .contains(TelemetryEvent::TaskRestarted("counter"))
        );
    }

    #[test]
    fn run_pass_visits_every_task_in_order() {
        let mut harness = Harness::new();
        let mut first = TaskSlot::cyclic(Counter {
            finish_at: 10,
            ..Counter::default()
        });
        let mut second = TaskSlot::cyclic(Counter {
            finish_at: 10,
            ..Counter::default()
        });

        for _ in 0..3 {
            let mut pass: [&mut dyn Runnable<()>; 2] = [&mut first, &mut second];
            run_pass(&mut pass, &mut harness.cx());
        }
        assert_eq!(first.task().resumes, 3);
        assert_eq!(second.task().resumes, 3);
    }
}
