//! Integration tests for the tickos-kernel crate.
//!
//! Each test boots a simulated machine with a user program as the initial
//! process and checks what the programs observed, or the final report.
//! Single-CPU machines are fully deterministic; multi-CPU tests only check
//! properties that hold under every interleaving.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tickos_kernel::machine::sim::{SimAddressSpaces, SimFiles, SimStacks};
use tickos_kernel::{
    Kernel, KernelConfig, KernelError, Machine, Pid, PolicyKind, ProcState, Semaphore,
};

const SECRET: u32 = 2016025032;

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries<T: Clone>(log: &Log<T>) -> Vec<T> {
    log.lock().unwrap().clone()
}

fn config(policy: PolicyKind) -> KernelConfig {
    KernelConfig::new()
        .with_policy(policy)
        .with_tick_limit(100_000)
}

fn boot(policy: PolicyKind) -> Kernel {
    Kernel::new(config(policy)).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn fork_wait_then_no_children() {
    let seen = log();
    let s = Arc::clone(&seen);
    let report = boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let child = ctx.fork(|c| c.compute(1)).unwrap();
            let reaped = ctx.wait().unwrap();
            let again = ctx.wait();
            s.lock().unwrap().push((child, reaped, again));
        })
        .unwrap();

    let (child, reaped, again) = entries(&seen).pop().unwrap();
    assert_eq!(child, Pid::new(2));
    assert_eq!(reaped, child);
    assert_eq!(again, Err(KernelError::NoChildren { pid: Pid::new(1) }));

    // Only init is left; the child's slot went back to the free pool.
    assert_eq!(report.procs.len(), 1);
    assert_eq!(report.procs[0].pid, Pid::new(1));
    assert_eq!(report.procs[0].name, "init");
}

#[test]
fn orphans_are_reparented_to_init() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let a = ctx
                .fork_named("a", |a| {
                    a.fork_named("b", |b| b.compute(5)).unwrap();
                    a.fork_named("c", |c| c.compute(5)).unwrap();
                })
                .unwrap();
            assert_eq!(ctx.wait().unwrap(), a);

            let parents: Vec<_> = ctx
                .procdump()
                .into_iter()
                .filter(|p| p.pid != Pid::new(1))
                .map(|p| (p.name, p.parent))
                .collect();

            let mut reaped = BTreeSet::new();
            reaped.insert(ctx.wait().unwrap());
            reaped.insert(ctx.wait().unwrap());
            let last = ctx.wait();
            s.lock().unwrap().push((parents, reaped, last));
        })
        .unwrap();

    let (parents, reaped, last) = entries(&seen).pop().unwrap();
    assert_eq!(parents.len(), 2);
    for (name, parent) in parents {
        assert!(name == "b" || name == "c");
        assert_eq!(parent, Some(Pid::new(1)));
    }
    assert_eq!(reaped, BTreeSet::from([Pid::new(3), Pid::new(4)]));
    assert!(matches!(last, Err(KernelError::NoChildren { .. })));
}

#[test]
fn child_sees_zero_fork_return_and_inherits_name() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let s = Arc::clone(&s);
            ctx.fork(move |c| {
                let ret = c.fork_ret();
                let name = c.report().name;
                s.lock().unwrap().push((ret, name));
            })
            .unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![(0, "init".to_string())]);
}

#[test]
fn init_returning_powers_off_cleanly() {
    let report = boot(PolicyKind::Mlfq).run(|ctx| ctx.compute(3)).unwrap();
    assert_eq!(report.ticks, 3);
    assert_eq!(report.procs.len(), 1);
    assert_eq!(report.procs[0].state, ProcState::Running);
}

#[test]
fn init_exiting_is_a_kernel_panic() {
    let err = boot(PolicyKind::RoundRobin).run(|ctx| ctx.exit()).unwrap_err();
    match err {
        KernelError::Panic(msg) => assert!(msg.contains("init exiting")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn tick_limit_halts_a_runaway_machine() {
    let err = Kernel::new(KernelConfig::new().with_tick_limit(50))
        .unwrap()
        .run(|ctx| loop {
            ctx.compute(1);
        })
        .unwrap_err();
    assert_eq!(err, KernelError::TickLimit { limit: 50 });
}

#[test]
fn invalid_config_is_rejected_at_boot() {
    let err = Kernel::new(KernelConfig::new().with_cpus(0)).unwrap_err();
    assert!(matches!(err, KernelError::Config { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Kill, faults and sleeping
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn killing_a_sleeper_wakes_it_and_it_exits() {
    let seen = log();
    let s = Arc::clone(&seen);
    let report = boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let s2 = Arc::clone(&s);
            let child = ctx
                .fork(move |c| {
                    let _ = c.sleep(1_000);
                    s2.lock().unwrap().push("returned to user mode");
                })
                .unwrap();
            ctx.yield_now();
            ctx.kill(child).unwrap();
            assert_eq!(ctx.wait().unwrap(), child);
            assert_eq!(ctx.kill(child), Err(KernelError::NoSuchProcess { pid: child }));
        })
        .unwrap();
    assert!(entries(&seen).is_empty());
    assert!(report.ticks < 1_000);
}

#[test]
fn sleep_waits_for_ticks() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let s = Arc::clone(&s);
            ctx.fork(move |c| {
                let start = c.uptime();
                c.sleep(10).unwrap();
                s.lock().unwrap().push(c.uptime() - start);
            })
            .unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert!(entries(&seen)[0] >= 10);
}

#[test]
fn faults_and_interrupt_128_terminate_the_process() {
    let report = boot(PolicyKind::RoundRobin)
        .run(|ctx| {
            let faulty = ctx.fork(|c| c.fault()).unwrap();
            let interrupted = ctx.fork(|c| c.user_interrupt()).unwrap();
            let mut reaped = vec![ctx.wait().unwrap(), ctx.wait().unwrap()];
            reaped.sort();
            assert_eq!(reaped, vec![faulty, interrupted]);
        })
        .unwrap();
    assert_eq!(report.procs.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Scheduling policies
// ═══════════════════════════════════════════════════════════════════════

/// Forks `children` children, each logging its pid before every one of
/// `units` units of work, and reaps them all.
fn interleaving(policy: PolicyKind, children: usize, units: u64) -> Vec<u32> {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(policy)
        .run(move |ctx| {
            for _ in 0..children {
                let s = Arc::clone(&s);
                ctx.fork(move |c| {
                    for _ in 0..units {
                        s.lock().unwrap().push(c.pid().get());
                        c.compute(1);
                    }
                })
                .unwrap();
            }
            for _ in 0..children {
                ctx.wait().unwrap();
            }
        })
        .unwrap();
    entries(&seen)
}

#[test]
fn round_robin_gives_one_turn_each_in_slot_order() {
    assert_eq!(
        interleaving(PolicyKind::RoundRobin, 3, 3),
        vec![2, 3, 4, 2, 3, 4, 2, 3, 4]
    );
}

#[test]
fn fcfs_runs_each_process_to_completion() {
    assert_eq!(
        interleaving(PolicyKind::Fcfs, 2, 5),
        vec![2, 2, 2, 2, 2, 3, 3, 3, 3, 3]
    );
}

#[test]
fn two_level_runs_even_pids_first() {
    assert_eq!(
        interleaving(PolicyKind::TwoLevel, 3, 3),
        vec![2, 4, 2, 4, 2, 4, 3, 3, 3]
    );
}

#[test]
fn fcfs_kills_a_process_that_exhausts_its_budget() {
    let seen = log();
    let s = Arc::clone(&seen);
    let kernel = Kernel::new(config(PolicyKind::Fcfs).with_fcfs_budget(20)).unwrap();
    kernel
        .run(move |ctx| {
            let child = ctx
                .fork(|c| loop {
                    c.compute(1);
                })
                .unwrap();
            assert_eq!(ctx.wait().unwrap(), child);
            s.lock().unwrap().push(ctx.uptime());
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![20]);
}

#[test]
fn mlfq_demotes_and_boost_restores_level_zero() {
    let seen = log();
    let s = Arc::clone(&seen);
    let kernel = Kernel::new(config(PolicyKind::Mlfq).with_boost_interval(50)).unwrap();
    kernel
        .run(move |ctx| {
            let s = Arc::clone(&s);
            ctx.fork(move |c| {
                let mut levels = vec![c.getlev()];
                c.compute(4);
                levels.push(c.getlev());
                assert_eq!(c.monopolize(SECRET), Ok(true));
                c.compute(60);
                levels.push(c.getlev());
                s.lock().unwrap().extend(levels);
            })
            .unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![0, 1, 0]);
}

#[test]
fn boost_resets_level_and_priority_of_demoted_records() {
    let seen = log();
    let s = Arc::clone(&seen);
    let kernel = Kernel::new(config(PolicyKind::Mlfq).with_boost_interval(20)).unwrap();
    kernel
        .run(move |ctx| {
            let ready = Arc::new(Semaphore::new(0));
            let gate = Arc::new(Semaphore::new(0));
            let (r, g) = (Arc::clone(&ready), Arc::clone(&gate));
            let child = ctx
                .fork(move |c| {
                    // Burn the level-0 quantum, then park at level 1.
                    c.compute(4);
                    c.sem_up(&r);
                    c.sem_down(&g).unwrap();
                })
                .unwrap();

            ctx.sem_down(&ready).unwrap();
            ctx.set_priority(child, 7).unwrap();
            let sched_of = |ctx: &mut tickos_kernel::UserContext| {
                ctx.procdump()
                    .into_iter()
                    .find(|p| p.pid == child)
                    .map(|p| (p.level, p.priority))
            };
            let before = sched_of(ctx);
            let start = ctx.uptime();
            // Idle ticks carry the clock across the next multiple of 20.
            ctx.sleep(20).unwrap();
            let after = sched_of(ctx);
            let end = ctx.uptime();

            ctx.sem_up(&gate);
            ctx.wait().unwrap();
            s.lock().unwrap().push((before, after, start, end));
        })
        .unwrap();

    let (before, after, start, end) = entries(&seen).pop().unwrap();
    assert_eq!(before, Some((1, 7)));
    assert!(start / 20 < end / 20, "no boost tick between {start} and {end}");
    assert_eq!(after, Some((0, 0)));
}

#[test]
fn mlfq_level_one_prefers_higher_priority() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::Mlfq)
        .run(move |ctx| {
            let mut pids = Vec::new();
            for _ in 0..2 {
                let s = Arc::clone(&s);
                pids.push(
                    ctx.fork(move |c| {
                        // Burn the level-0 quantum, then run once more at level 1.
                        c.compute(4);
                        s.lock().unwrap().push(c.pid().get());
                        c.compute(1);
                    })
                    .unwrap(),
                );
            }
            ctx.set_priority(pids[1], 7).unwrap();
            ctx.wait().unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![3, 2]);
}

#[test]
fn two_cpus_reap_every_child_exactly_once() {
    let reaped = log();
    let r = Arc::clone(&reaped);
    let kernel = Kernel::new(config(PolicyKind::RoundRobin).with_cpus(2).with_tick_limit(10_000_000))
        .unwrap();
    kernel
        .run(move |ctx| {
            let mut forked = BTreeSet::new();
            for _ in 0..8 {
                forked.insert(ctx.fork(|c| c.compute(20)).unwrap());
            }
            let mut seen = BTreeSet::new();
            for _ in 0..8 {
                assert!(seen.insert(ctx.wait().unwrap()));
            }
            assert_eq!(seen, forked);
            r.lock().unwrap().extend(seen);
        })
        .unwrap();
    assert_eq!(entries(&reaped).len(), 8);
}

// ═══════════════════════════════════════════════════════════════════════
//  Administrative controls
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn set_priority_validates_range_and_parentage() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::Mlfq)
        .run(move |ctx| {
            let gate = Arc::new(Semaphore::new(0));
            let g = Arc::clone(&gate);
            let x = ctx
                .fork(move |x| {
                    x.sem_down(&g).unwrap();
                })
                .unwrap();

            let mut results = vec![
                ctx.set_priority(x, 11),
                ctx.set_priority(x, -1),
                ctx.set_priority(x, 5),
                ctx.set_priority(Pid::new(99), 1),
            ];

            let s2 = Arc::clone(&s);
            let y = ctx
                .fork(move |y| {
                    let r = y.set_priority(x, 3);
                    s2.lock().unwrap().push(r);
                })
                .unwrap();
            assert_eq!(ctx.wait().unwrap(), y);

            let priority = ctx
                .procdump()
                .into_iter()
                .find(|p| p.pid == x)
                .map(|p| p.priority);
            ctx.sem_up(&gate);
            ctx.wait().unwrap();

            s.lock().unwrap().extend(results);
            assert_eq!(priority, Some(5));
        })
        .unwrap();

    let results = entries(&seen);
    assert_eq!(
        results[0],
        Err(KernelError::NotParent {
            caller: Pid::new(3),
            pid: Pid::new(2)
        })
    );
    assert_eq!(
        results[1],
        Err(KernelError::InvalidPriority { value: 11, max: 10 })
    );
    assert_eq!(
        results[2],
        Err(KernelError::InvalidPriority { value: -1, max: 10 })
    );
    assert_eq!(results[3], Ok(()));
    assert_eq!(
        results[4],
        Err(KernelError::NoSuchProcess { pid: Pid::new(99) })
    );
}

#[test]
fn monopolize_toggles_with_the_right_token() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::Mlfq)
        .run(move |ctx| {
            let s = Arc::clone(&s);
            ctx.fork(move |c| {
                let on = c.monopolize(SECRET);
                let off = c.monopolize(SECRET);
                let lev = c.getlev();
                s.lock().unwrap().push((on, off, lev));
            })
            .unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![(Ok(true), Ok(false), 0)]);
}

#[test]
fn monopolize_with_a_wrong_token_kills_the_caller() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::Mlfq)
        .run(move |ctx| {
            let s = Arc::clone(&s);
            let child = ctx
                .fork(move |c| {
                    let _ = c.monopolize(1234);
                    s.lock().unwrap().push("survived");
                })
                .unwrap();
            assert_eq!(ctx.wait().unwrap(), child);
        })
        .unwrap();
    assert!(entries(&seen).is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Synchronization
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn ping_pong_across_cpus_never_loses_a_wakeup() {
    const ROUNDS: u64 = 200;
    let done = Arc::new(AtomicU64::new(0));
    let d = Arc::clone(&done);
    let kernel = Kernel::new(config(PolicyKind::RoundRobin).with_cpus(2).with_tick_limit(10_000_000))
        .unwrap();
    kernel
        .run(move |ctx| {
            let ping = Arc::new(Semaphore::new(0));
            let pong = Arc::new(Semaphore::new(0));

            let (pi, po, d1) = (Arc::clone(&ping), Arc::clone(&pong), Arc::clone(&d));
            ctx.fork(move |c| {
                for _ in 0..ROUNDS {
                    c.sem_down(&pi).unwrap();
                    c.sem_up(&po);
                }
                d1.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

            let (pi, po, d2) = (Arc::clone(&ping), Arc::clone(&pong), Arc::clone(&d));
            ctx.fork(move |c| {
                for _ in 0..ROUNDS {
                    c.sem_up(&pi);
                    c.sem_down(&po).unwrap();
                }
                d2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

            ctx.wait().unwrap();
            ctx.wait().unwrap();
        })
        .unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[test]
fn producers_and_consumers_balance() {
    let consumed = Arc::new(AtomicU64::new(0));
    let c = Arc::clone(&consumed);
    let kernel = Kernel::new(config(PolicyKind::RoundRobin).with_cpus(3).with_tick_limit(10_000_000))
        .unwrap();
    kernel
        .run(move |ctx| {
            let items = Arc::new(Semaphore::new(0));
            for _ in 0..2 {
                let items = Arc::clone(&items);
                ctx.fork(move |p| {
                    for _ in 0..100 {
                        p.sem_up(&items);
                        p.compute(1);
                    }
                })
                .unwrap();
            }
            for _ in 0..2 {
                let items = Arc::clone(&items);
                let consumed = Arc::clone(&c);
                ctx.fork(move |k| {
                    for _ in 0..100 {
                        k.sem_down(&items).unwrap();
                        consumed.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
            }
            for _ in 0..4 {
                ctx.wait().unwrap();
            }
        })
        .unwrap();
    assert_eq!(consumed.load(Ordering::SeqCst), 200);
}

// ═══════════════════════════════════════════════════════════════════════
//  Resources and collaborators
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn failed_fork_leaves_no_trace() {
    let vm = Arc::new(SimAddressSpaces::new(2));
    let stacks = Arc::new(SimStacks::new(16));
    let machine = Machine::new(vm.clone(), stacks.clone(), Arc::new(SimFiles::new()));
    let seen = log();
    let s = Arc::clone(&seen);
    let (vm2, stacks2) = (Arc::clone(&vm), Arc::clone(&stacks));

    Kernel::with_machine(config(PolicyKind::RoundRobin), machine)
        .unwrap()
        .run(move |ctx| {
            let first = ctx.fork(|_| {}).unwrap();
            let failed = ctx.fork(|_| {});
            let live = ctx.procdump().len();
            let stacks_after_failure = stacks2.in_use();
            assert_eq!(ctx.wait().unwrap(), first);
            let second = ctx.fork(|_| {}).unwrap();
            ctx.wait().unwrap();
            s.lock().unwrap().push((
                failed,
                live,
                stacks_after_failure,
                second,
                vm2.live_spaces(),
            ));
        })
        .unwrap();

    let (failed, live, stacks_after_failure, second, spaces) = entries(&seen).pop().unwrap();
    assert!(matches!(failed, Err(KernelError::OutOfMemory { .. })));
    assert_eq!(live, 2);
    assert_eq!(stacks_after_failure, 2);
    // The pid burned by the failed fork is never handed out again.
    assert_eq!(second, Pid::new(4));
    assert_eq!(spaces, 1);
}

#[test]
fn full_table_and_stack_exhaustion_are_reported() {
    let seen = log();
    let s = Arc::clone(&seen);
    Kernel::new(config(PolicyKind::RoundRobin).with_nproc(3))
        .unwrap()
        .run(move |ctx| {
            let gate = Arc::new(Semaphore::new(0));
            for _ in 0..2 {
                let gate = Arc::clone(&gate);
                ctx.fork(move |c| c.sem_down(&gate).unwrap()).unwrap();
            }
            let full = ctx.fork(|_| {});
            ctx.sem_up(&gate);
            ctx.sem_up(&gate);
            ctx.wait().unwrap();
            ctx.wait().unwrap();
            s.lock().unwrap().push(full);
        })
        .unwrap();
    assert_eq!(
        entries(&seen),
        vec![Err(KernelError::TableFull { capacity: 3 })]
    );

    let machine = Machine::new(
        Arc::new(SimAddressSpaces::new(64)),
        Arc::new(SimStacks::new(1)),
        Arc::new(SimFiles::new()),
    );
    let seen = log();
    let s = Arc::clone(&seen);
    Kernel::with_machine(config(PolicyKind::RoundRobin), machine)
        .unwrap()
        .run(move |ctx| {
            let r = ctx.fork(|_| {});
            s.lock().unwrap().push((r, ctx.procdump().len()));
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![(Err(KernelError::StackExhausted), 1)]);
}

#[test]
fn file_references_are_released_exactly_once() {
    let files = Arc::new(SimFiles::new());
    let machine = Machine::new(
        Arc::new(SimAddressSpaces::new(64)),
        Arc::new(SimStacks::new(16)),
        files.clone(),
    );
    let seen = log();
    let s = Arc::clone(&seen);
    let f = Arc::clone(&files);

    Kernel::with_machine(config(PolicyKind::RoundRobin).with_tick_limit(1_000), machine)
        .unwrap()
        .run(move |ctx| {
            let console = ctx.open("console").unwrap();
            ctx.fork(|c| {
                c.open("scratch").unwrap();
            })
            .unwrap();
            ctx.wait().unwrap();
            let after_child = (f.open_files(), f.root_refs());
            ctx.close(console).unwrap();
            let double_close = ctx.close(console);
            s.lock()
                .unwrap()
                .push((console, after_child, f.open_files(), double_close));
        })
        .unwrap();

    let (console, after_child, after_close, double_close) = entries(&seen).pop().unwrap();
    assert_eq!(console, 0);
    assert_eq!(after_child, (1, 1));
    assert_eq!(after_close, 0);
    assert_eq!(double_close, Err(KernelError::BadFileDescriptor { fd: 0 }));
}

#[test]
fn descriptor_table_overflow_does_not_leak() {
    let files = Arc::new(SimFiles::new());
    let machine = Machine::new(
        Arc::new(SimAddressSpaces::new(64)),
        Arc::new(SimStacks::new(16)),
        files.clone(),
    );
    let mut cfg = config(PolicyKind::RoundRobin);
    cfg.nofile = 2;
    let seen = log();
    let s = Arc::clone(&seen);
    let f = Arc::clone(&files);

    Kernel::with_machine(cfg, machine)
        .unwrap()
        .run(move |ctx| {
            let a = ctx.open("a");
            let b = ctx.open("b");
            let c = ctx.open("c");
            s.lock().unwrap().push((a, b, c, f.open_files()));
        })
        .unwrap();
    assert_eq!(
        entries(&seen),
        vec![(
            Ok(0),
            Ok(1),
            Err(KernelError::NoFileDescriptor { limit: 2 }),
            2
        )]
    );
}

#[test]
fn sbrk_grows_and_shrinks_user_memory() {
    let seen = log();
    let s = Arc::clone(&seen);
    boot(PolicyKind::RoundRobin)
        .run(move |ctx| {
            let sizes = vec![
                ctx.sbrk(8192).unwrap(),
                ctx.sbrk(0).unwrap(),
                ctx.sbrk(-8192).unwrap(),
                ctx.sbrk(0).unwrap(),
            ];
            s.lock().unwrap().extend(sizes);
        })
        .unwrap();
    assert_eq!(entries(&seen), vec![4096, 12288, 12288, 4096]);
}
