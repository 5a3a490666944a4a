//! Built-in workloads.
//!
//! Each workload is the program of the initial process.  It forks a handful
//! of children with different behavior, reaps them all and returns, which
//! powers the machine off.

use clap::ValueEnum;
use tickos_kernel::{Pid, UserContext};
use tracing::{info, warn};

/// Token accepted by `monopolize` under the default configuration.
const EXCLUSIVE_SECRET: u32 = 2016025032;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Workload {
    /// Children that give up the processor after every unit of work.
    Yield,
    /// CPU-bound and sleeping children side by side, one of them prioritized.
    Mixed,
    /// A child that never stops computing until the kernel or init kills it.
    Runaway,
    /// A child in exclusive mode next to a normal one and an impostor.
    Monopolize,
    /// Children sleeping for different numbers of ticks.
    Sleepers,
}

impl Workload {
    pub fn describe(self) -> &'static str {
        match self {
            Workload::Yield => "three children that yield after every unit of work",
            Workload::Mixed => "CPU-bound and sleeping children, one with raised priority",
            Workload::Runaway => "an endless computation killed by its budget or by init",
            Workload::Monopolize => "exclusive mode with a valid and an invalid token",
            Workload::Sleepers => "children sleeping 5, 10, 20 and 40 ticks",
        }
    }

    /// Program of the initial process.
    pub fn program(self) -> fn(&mut UserContext) {
        match self {
            Workload::Yield => yielders,
            Workload::Mixed => mixed,
            Workload::Runaway => runaway,
            Workload::Monopolize => monopolize,
            Workload::Sleepers => sleepers,
        }
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => Ok(()),
        }
    }
}

/// Reap children until none are left.
fn reap_all(ctx: &mut UserContext) {
    while let Ok(pid) = ctx.wait() {
        info!(%pid, "reaped");
    }
}

fn spawn(ctx: &mut UserContext, name: &str, program: fn(&mut UserContext)) -> Option<Pid> {
    match ctx.fork_named(name, program) {
        Ok(pid) => Some(pid),
        Err(err) => {
            warn!(name, error = %err, "fork failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

fn yielders(ctx: &mut UserContext) {
    for name in ["yield-a", "yield-b", "yield-c"] {
        spawn(ctx, name, |c| {
            for _ in 0..5 {
                c.compute(1);
                c.yield_now();
            }
            c.report();
        });
    }
    reap_all(ctx);
}

fn mixed(ctx: &mut UserContext) {
    spawn(ctx, "cpu-short", |c| {
        c.compute(20);
        c.report();
    });
    let long = spawn(ctx, "cpu-long", |c| {
        c.compute(60);
        c.report();
    });
    spawn(ctx, "io", |c| {
        for _ in 0..5 {
            if c.sleep(3).is_err() {
                return;
            }
            c.compute(1);
        }
        c.report();
    });
    if let Some(pid) = long {
        if let Err(err) = ctx.set_priority(pid, 5) {
            warn!(%pid, error = %err, "set priority failed");
        }
    }
    for info in ctx.procdump() {
        info!("{info}");
    }
    reap_all(ctx);
}

fn runaway(ctx: &mut UserContext) {
    let Some(pid) = spawn(ctx, "runaway", |c| {
        loop {
            c.compute(1);
        }
    }) else {
        return;
    };
    if ctx.sleep(50).is_ok() {
        match ctx.kill(pid) {
            Ok(()) => info!(%pid, "runaway killed by init"),
            Err(err) => info!(%pid, error = %err, "runaway already gone"),
        }
    }
    reap_all(ctx);
}

fn monopolize(ctx: &mut UserContext) {
    spawn(ctx, "exclusive", |c| {
        if c.monopolize(EXCLUSIVE_SECRET).is_ok() {
            c.compute(50);
            let _ = c.monopolize(EXCLUSIVE_SECRET);
        }
        c.report();
    });
    spawn(ctx, "normal", |c| {
        c.compute(30);
        c.report();
    });
    spawn(ctx, "impostor", |c| {
        let _ = c.monopolize(EXCLUSIVE_SECRET.wrapping_add(1));
        c.report();
    });
    reap_all(ctx);
}

fn sleepers(ctx: &mut UserContext) {
    let programs: [(&str, fn(&mut UserContext)); 4] = [
        ("sleep-5", |c| nap(c, 5)),
        ("sleep-10", |c| nap(c, 10)),
        ("sleep-20", |c| nap(c, 20)),
        ("sleep-40", |c| nap(c, 40)),
    ];
    for (name, program) in programs {
        spawn(ctx, name, program);
    }
    reap_all(ctx);
}

fn nap(c: &mut UserContext, ticks: u64) {
    let start = c.uptime();
    if c.sleep(ticks).is_ok() {
        info!(pid = %c.pid(), slept = c.uptime() - start, "woke up");
    }
}
