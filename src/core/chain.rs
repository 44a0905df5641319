//! The recursive namespace-chain builder.
//!
//! Each call to [`run_link`] is one generation. A non-terminal generation
//! clones a child into a fresh PID namespace nested inside its own, and the
//! child runs `run_link` again one level down. Because every clone is issued
//! by a process already inside the previous namespace, the namespaces form a
//! strict chain rather than siblings.

use std::path::Path;

use nix::sys::wait::WaitStatus;
use nix::unistd::{getpid, Pid};

use super::config::ChainConfig;
use super::error::ChainError;
use super::model::{ChainLink, Phase, Workload};
use super::plan::mount_point;
use crate::util::report_fatal;

/// Entry point of a cloned child. The return value becomes its exit status.
pub type ChildFn<'a> = Box<dyn FnMut() -> isize + 'a>;

/// Memory handed to a child as its initial stack.
///
/// Dropping an unreleased context releases it; `release` is the checked
/// variant for the success path.
pub trait ExecutionContext: Sized {
    fn release(self) -> Result<(), ChainError>;
}

/// The side effects the builder performs on its host.
pub trait Host {
    type Stack: ExecutionContext;

    /// Create `target` and mount the proc filesystem of the caller's PID
    /// namespace on it.
    fn mount_info_fs(&self, target: &Path) -> Result<(), ChainError>;

    fn allocate_stack(&self, size: usize) -> Result<Self::Stack, ChainError>;

    /// Start `child` as a direct, reapable child of the caller inside a new
    /// PID namespace, running on `stack`.
    fn spawn_nested(
        &self,
        stack: &mut Self::Stack,
        level: u32,
        child: ChildFn<'_>,
    ) -> Result<Pid, ChainError>;

    /// Block until `child` terminates.
    fn wait(&self, child: Pid) -> Result<WaitStatus, ChainError>;

    /// Replace the process image with `workload`. Only returns on failure.
    fn exec_workload(&self, workload: &Workload) -> ChainError;
}

/// Run one generation of the chain.
///
/// Returns `Ok(())` once the child has been reaped and its stack released.
/// The terminal link never returns on success because its image is replaced.
pub fn run_link<H: Host>(
    host: &H,
    config: &ChainConfig,
    link: ChainLink,
) -> Result<(), ChainError> {
    let span = tracing::info_span!("link", level = link.level, pid = getpid().as_raw());
    let _enter = span.enter();
    tracing::debug!(phase = %Phase::Created);

    if link.is_first_invocation {
        tracing::debug!(phase = %Phase::SkippedMount);
    } else {
        let target = mount_point(&config.mount_prefix, link.level);
        host.mount_info_fs(&target)?;
        tracing::info!(
            phase = %Phase::MountedInfoFs,
            mount_point = %target.display(),
            "mounted procfs"
        );
    }

    let Some(next) = link.descend() else {
        tracing::info!(
            phase = %Phase::Terminal,
            workload = %config.workload,
            "final child running workload"
        );
        return Err(host.exec_workload(&config.workload));
    };

    // Dropped on every early return below, so a failed spawn or wait does
    // not leak the mapping.
    let mut stack = host.allocate_stack(config.stack_size)?;
    let child = host.spawn_nested(
        &mut stack,
        next.level,
        Box::new(move || child_main(host, config, next)),
    )?;
    tracing::debug!(phase = %Phase::Recursing, child = child.as_raw());

    let status = host.wait(child)?;
    // Not inspected: a failure deeper in the chain does not fail this link.
    tracing::debug!(?status, "child reaped");

    stack.release()?;
    tracing::debug!(phase = %Phase::Exited);
    Ok(())
}

fn child_main<H: Host>(host: &H, config: &ChainConfig, link: ChainLink) -> isize {
    match run_link(host, config, link) {
        Ok(()) => 0,
        Err(e) => {
            report_fatal(&anyhow::Error::new(e));
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;

    use nix::errno::Errno;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Mount(PathBuf),
        Allocate(usize),
        Spawn { ctx: usize, level: u32 },
        ChildExit { pid: i32, code: isize },
        Wait(i32),
        Release(usize),
        Exec(String),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct RecordedStack {
        id: usize,
        log: Log,
        fail_release: bool,
    }

    impl ExecutionContext for RecordedStack {
        fn release(self) -> Result<(), ChainError> {
            if self.fail_release {
                return Err(ChainError::Release {
                    source: Errno::EINVAL,
                });
            }
            Ok(())
        }
    }

    impl Drop for RecordedStack {
        fn drop(&mut self) {
            self.log.borrow_mut().push(Event::Release(self.id));
        }
    }

    /// Runs children in-process and records every side effect.
    #[derive(Default)]
    struct RecordingHost {
        log: Log,
        allocations: Cell<usize>,
        spawns: Cell<usize>,
        exit_codes: RefCell<HashMap<i32, isize>>,
        fail_allocation: Option<usize>,
        fail_spawn: Option<usize>,
        fail_mount: Option<PathBuf>,
        fail_wait: bool,
        fail_release: bool,
    }

    impl RecordingHost {
        fn record(&self, event: Event) {
            self.log.borrow_mut().push(event);
        }

        fn events(&self) -> Vec<Event> {
            self.log.borrow().clone()
        }

        fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
            self.log.borrow().iter().filter(|e| pred(*e)).count()
        }
    }

    fn pid_for(ctx: usize) -> i32 {
        100 + ctx as i32
    }

    impl Host for RecordingHost {
        type Stack = RecordedStack;

        fn mount_info_fs(&self, target: &Path) -> Result<(), ChainError> {
            if self.fail_mount.as_deref() == Some(target) {
                return Err(ChainError::Mount {
                    path: target.to_path_buf(),
                    source: Errno::EPERM,
                });
            }
            self.record(Event::Mount(target.to_path_buf()));
            Ok(())
        }

        fn allocate_stack(&self, size: usize) -> Result<RecordedStack, ChainError> {
            let id = self.allocations.get();
            self.allocations.set(id + 1);
            if self.fail_allocation == Some(id) {
                return Err(ChainError::Allocate {
                    size,
                    source: Errno::ENOMEM,
                });
            }
            self.record(Event::Allocate(id));
            Ok(RecordedStack {
                id,
                log: Rc::clone(&self.log),
                fail_release: self.fail_release,
            })
        }

        fn spawn_nested(
            &self,
            stack: &mut RecordedStack,
            level: u32,
            mut child: ChildFn<'_>,
        ) -> Result<Pid, ChainError> {
            let n = self.spawns.get();
            self.spawns.set(n + 1);
            if self.fail_spawn == Some(n) {
                return Err(ChainError::Spawn {
                    level,
                    source: Errno::EPERM,
                });
            }
            self.record(Event::Spawn {
                ctx: stack.id,
                level,
            });
            let pid = pid_for(stack.id);
            let code = child();
            self.record(Event::ChildExit { pid, code });
            self.exit_codes.borrow_mut().insert(pid, code);
            Ok(Pid::from_raw(pid))
        }

        fn wait(&self, child: Pid) -> Result<WaitStatus, ChainError> {
            self.record(Event::Wait(child.as_raw()));
            if self.fail_wait {
                return Err(ChainError::Wait {
                    pid: child,
                    source: Errno::ECHILD,
                });
            }
            let code = self.exit_codes.borrow()[&child.as_raw()];
            Ok(WaitStatus::Exited(child, code as i32))
        }

        fn exec_workload(&self, workload: &Workload) -> ChainError {
            let program = workload.program().unwrap_or_default().to_string();
            self.record(Event::Exec(program.clone()));
            // An in-process host cannot replace its image.
            ChainError::Exec {
                program,
                source: Errno::ENOEXEC,
            }
        }
    }

    fn config(depth: u32) -> ChainConfig {
        ChainConfig {
            depth,
            ..ChainConfig::default()
        }
    }

    fn run(host: &RecordingHost, depth: u32) -> Result<(), ChainError> {
        let cfg = config(depth);
        run_link(host, &cfg, ChainLink::initial(depth))
    }

    fn position(events: &[Event], event: &Event) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event:?} not recorded in {events:?}"))
    }

    #[test]
    fn depth_two_runs_in_order() {
        let host = RecordingHost::default();
        run(&host, 2).unwrap();

        assert_eq!(
            host.events(),
            vec![
                Event::Allocate(0),
                Event::Spawn { ctx: 0, level: 1 },
                Event::Mount("/proc1".into()),
                Event::Allocate(1),
                Event::Spawn { ctx: 1, level: 0 },
                Event::Mount("/proc0".into()),
                Event::Exec("sleep".into()),
                Event::ChildExit { pid: 101, code: 1 },
                Event::Wait(101),
                Event::Release(1),
                Event::ChildExit { pid: 100, code: 0 },
                Event::Wait(100),
                Event::Release(0),
            ]
        );
    }

    #[test]
    fn depth_zero_execs_directly() {
        let host = RecordingHost::default();
        let err = run(&host, 0).unwrap_err();

        assert!(matches!(err, ChainError::Exec { .. }));
        assert_eq!(host.events(), vec![Event::Exec("sleep".into())]);
    }

    #[test]
    fn one_spawn_wait_and_mount_per_level() {
        for depth in 0..=8 {
            let host = RecordingHost::default();
            let _ = run(&host, depth);
            let d = depth as usize;

            assert_eq!(host.count(|e| matches!(e, Event::Spawn { .. })), d);
            assert_eq!(host.count(|e| matches!(e, Event::Wait(_))), d);
            assert_eq!(host.count(|e| matches!(e, Event::Mount(_))), d);
            assert_eq!(host.count(|e| matches!(e, Event::Allocate(_))), d);
            assert_eq!(host.count(|e| matches!(e, Event::Release(_))), d);
            assert_eq!(host.count(|e| matches!(e, Event::Exec(_))), 1);
        }
    }

    #[test]
    fn first_invocation_never_mounts() {
        let host = RecordingHost::default();
        run(&host, 1).unwrap();
        assert_eq!(host.events()[0], Event::Allocate(0));
        assert!(!host.events().contains(&Event::Mount("/proc1".into())));
    }

    #[test]
    fn every_stack_is_released_after_its_wait() {
        let host = RecordingHost::default();
        run(&host, 5).unwrap();
        let events = host.events();

        for ctx in 0..5 {
            let waited = position(&events, &Event::Wait(pid_for(ctx)));
            let released = position(&events, &Event::Release(ctx));
            assert!(waited < released, "stack {ctx} released before its wait");
        }
    }

    #[test]
    fn mount_failure_stops_the_chain_at_that_level() {
        let host = RecordingHost {
            fail_mount: Some("/proc1".into()),
            ..RecordingHost::default()
        };
        // The failing child exits 1, which its parent does not inspect.
        run(&host, 3).unwrap();

        let events = host.events();
        assert_eq!(host.count(|e| matches!(e, Event::Spawn { .. })), 2);
        assert!(!events.contains(&Event::Allocate(2)));
        assert!(events.contains(&Event::ChildExit { pid: 101, code: 1 }));
        assert_eq!(host.count(|e| matches!(e, Event::Exec(_))), 0);
    }

    #[test]
    fn allocation_failure_aborts_without_spawning() {
        let host = RecordingHost {
            fail_allocation: Some(0),
            ..RecordingHost::default()
        };
        let err = run(&host, 3).unwrap_err();

        assert!(matches!(err, ChainError::Allocate { size, .. } if size == 1024 * 1024));
        assert!(host.events().is_empty());
    }

    #[test]
    fn allocation_failure_deeper_leaks_nothing_above() {
        let host = RecordingHost {
            fail_allocation: Some(2),
            ..RecordingHost::default()
        };
        run(&host, 4).unwrap();

        assert_eq!(host.count(|e| matches!(e, Event::Spawn { .. })), 2);
        assert_eq!(host.count(|e| matches!(e, Event::Release(_))), 2);
        assert!(host
            .events()
            .contains(&Event::ChildExit { pid: 101, code: 1 }));
    }

    #[test]
    fn spawn_failure_releases_the_stack() {
        let host = RecordingHost {
            fail_spawn: Some(0),
            ..RecordingHost::default()
        };
        let err = run(&host, 1).unwrap_err();

        assert!(matches!(err, ChainError::Spawn { level: 0, .. }));
        assert_eq!(host.events(), vec![Event::Allocate(0), Event::Release(0)]);
    }

    #[test]
    fn wait_failure_is_fatal_and_still_releases() {
        let host = RecordingHost {
            fail_wait: true,
            ..RecordingHost::default()
        };
        let err = run(&host, 1).unwrap_err();

        assert!(matches!(err, ChainError::Wait { .. }));
        let events = host.events();
        assert!(position(&events, &Event::Wait(100)) < position(&events, &Event::Release(0)));
    }

    #[test]
    fn release_failure_after_wait_is_fatal() {
        let host = RecordingHost {
            fail_release: true,
            ..RecordingHost::default()
        };
        let err = run(&host, 1).unwrap_err();

        assert!(matches!(err, ChainError::Release { .. }));
        assert_eq!(
            host.events(),
            vec![
                Event::Allocate(0),
                Event::Spawn { ctx: 0, level: 0 },
                Event::Mount("/proc0".into()),
                Event::Exec("sleep".into()),
                Event::ChildExit { pid: 100, code: 1 },
                Event::Wait(100),
                Event::Release(0),
            ]
        );
    }
}
