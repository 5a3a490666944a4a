//! Process creation, termination and reaping.
//!
//! Every operation that can fail does its fallible work (kernel stack,
//! address space, context) outside the table lock and undoes it completely
//! on failure, so a failed fork never leaves a visible record behind.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::proc::{Channel, Pid, ProcHandle, ProcState, Program, SchedMeta, TrapFrame};
use crate::scheduler;
use crate::sync;
use crate::table::Reaped;

/// Length of the embedded initial program image.
const INITCODE_LEN: usize = 44;

/// Claim a slot and give it a kernel stack and a context that starts in
/// `forkret`.  The record is left as an embryo.
fn allocproc(kernel: &Arc<Kernel>) -> Result<ProcHandle> {
    let handle = {
        let mut table = kernel.ptable.lock();
        let capacity = table.capacity();
        table
            .claim_unused(SchedMeta::fresh(kernel.config().level0_quantum))
            .ok_or(KernelError::TableFull { capacity })?
    };

    let Some(kstack) = kernel.machine.stacks.alloc() else {
        discard(kernel, handle);
        return Err(KernelError::StackExhausted);
    };
    let context = match kernel.spawn_process(handle) {
        Ok(context) => context,
        Err(err) => {
            kernel.machine.stacks.free(kstack);
            discard(kernel, handle);
            return Err(err);
        }
    };

    {
        let mut table = kernel.ptable.lock();
        let p = table.record_mut(handle);
        p.kstack = Some(kstack);
        p.context = Some(context);
    }
    debug!(pid = %handle.pid(), slot = handle.slot(), "allocated process");
    Ok(handle)
}

/// Return an embryo and everything it owns to the free pools.
fn discard(kernel: &Kernel, handle: ProcHandle) {
    let reaped = kernel.ptable.lock().discard(handle);
    release(kernel, handle, reaped);
}

/// Free what a record owned once its slot is back in the pool, and join
/// its host thread.
fn release(kernel: &Kernel, handle: ProcHandle, reaped: Reaped) {
    kernel.join_process(handle);
    if let Some(kstack) = reaped.kstack {
        kernel.machine.stacks.free(kstack);
    }
    if let Some(pgdir) = reaped.pgdir {
        kernel.machine.vm.destroy(pgdir);
    }
}

/// Create the first process, running `program`.
pub(crate) fn spawn_init(kernel: &Arc<Kernel>, program: Program) -> Result<ProcHandle> {
    let handle = allocproc(kernel)?;
    let vm = &kernel.machine.vm;

    let space = match vm.create() {
        Ok(space) => space,
        Err(err) => {
            discard(kernel, handle);
            return Err(err);
        }
    };
    let sz = match vm.load_image(space, INITCODE_LEN) {
        Ok(sz) => sz,
        Err(err) => {
            vm.destroy(space);
            discard(kernel, handle);
            return Err(err);
        }
    };
    let cwd = kernel.machine.files.root();

    {
        let mut table = kernel.ptable.lock();
        let p = table.record_mut(handle);
        p.pgdir = Some(space);
        p.sz = sz;
        p.tf = TrapFrame {
            entry: Some(program),
            ret: 0,
        };
        p.set_name("init");
        p.cwd = Some(cwd);
        p.state = ProcState::Runnable;
    }
    kernel.set_initproc(handle);
    info!(pid = %handle.pid(), "init process created");
    Ok(handle)
}

/// Create a child of `me` that starts executing `program`.
///
/// The child gets a copy of the parent's memory, references to its open
/// files and working directory, and a zero return-value register.
pub(crate) fn fork(
    kernel: &Arc<Kernel>,
    me: ProcHandle,
    program: Program,
    name: Option<&str>,
) -> Result<Pid> {
    let child = allocproc(kernel)?;

    let (space, sz, parent_name, ofile, cwd) = {
        let table = kernel.ptable.lock();
        let p = table.record(me);
        (p.pgdir, p.sz, p.name.clone(), p.ofile.clone(), p.cwd)
    };
    let Some(space) = space else {
        discard(kernel, child);
        return Err(KernelError::Internal(format!("pid {} has no address space", me.pid())));
    };
    let copy = match kernel.machine.vm.duplicate(space, sz) {
        Ok(copy) => copy,
        Err(err) => {
            discard(kernel, child);
            return Err(err);
        }
    };

    let files = &kernel.machine.files;
    let ofile: Vec<_> = ofile.into_iter().map(|f| f.map(|f| files.dup(f))).collect();
    let cwd = cwd.map(|dir| files.idup(dir));

    {
        let mut table = kernel.ptable.lock();
        let c = table.record_mut(child);
        c.pgdir = Some(copy);
        c.sz = sz;
        c.parent = Some(me);
        c.tf = TrapFrame {
            entry: Some(program),
            ret: 0,
        };
        c.ofile = ofile;
        c.cwd = cwd;
        c.set_name(name.unwrap_or(&parent_name));
        c.state = ProcState::Runnable;
    }
    debug!(parent = %me.pid(), pid = %child.pid(), "fork");
    Ok(child.pid())
}

/// Terminate `me`.  The record stays a zombie until its parent reaps it.
pub(crate) fn exit(kernel: &Kernel, me: ProcHandle) -> ! {
    let init = kernel.initproc();
    if me == init {
        panic!("init exiting");
    }

    let (files, cwd) = {
        let mut table = kernel.ptable.lock();
        let p = table.record_mut(me);
        let files: Vec<_> = p.ofile.iter_mut().filter_map(Option::take).collect();
        (files, p.cwd.take())
    };
    for file in files {
        kernel.machine.files.close(file);
    }
    if let Some(cwd) = cwd {
        kernel.machine.files.iput(cwd);
    }

    let mut table = kernel.ptable.lock();

    // The parent might be sleeping in wait().
    if let Some(parent) = table.record(me).parent {
        table.wakeup1(Channel::Proc(parent.pid()));
    }

    // Pass abandoned children to init.
    for child in table.children(me) {
        let zombie = {
            let c = table.record_mut(child);
            c.parent = Some(init);
            c.state == ProcState::Zombie
        };
        if zombie {
            table.wakeup1(Channel::Proc(init.pid()));
        }
    }

    table.record_mut(me).state = ProcState::Zombie;
    debug!(pid = %me.pid(), "exit");
    scheduler::sched_exit(kernel, table, me)
}

/// Wait for a child to exit and reap it.
pub(crate) fn wait(kernel: &Kernel, me: ProcHandle) -> Result<Pid> {
    let mut table = kernel.ptable.lock();
    loop {
        let children = table.children(me);
        let zombie = children
            .iter()
            .copied()
            .find(|child| table.record(*child).state == ProcState::Zombie);
        if let Some(child) = zombie {
            let reaped = table.reap(child);
            drop(table);
            release(kernel, child, reaped);
            debug!(parent = %me.pid(), pid = %child.pid(), "reaped");
            return Ok(child.pid());
        }

        if children.is_empty() {
            return Err(KernelError::NoChildren { pid: me.pid() });
        }
        if table.record(me).killed {
            return Err(KernelError::Killed { pid: me.pid() });
        }

        sync::sleep_locked(kernel, me, Channel::Proc(me.pid()), &mut table);
    }
}

/// Mark `pid` killed.  A sleeping target is made runnable so it notices.
pub(crate) fn kill(kernel: &Kernel, pid: Pid) -> Result<()> {
    let mut table = kernel.ptable.lock();
    let handle = table
        .find_pid(pid)
        .ok_or(KernelError::NoSuchProcess { pid })?;
    let p = table.record_mut(handle);
    p.killed = true;
    if p.state == ProcState::Sleeping {
        p.state = ProcState::Runnable;
    }
    debug!(%pid, "killed");
    Ok(())
}

/// Grow or shrink user memory by `delta` bytes; returns the old size.
pub(crate) fn growproc(kernel: &Kernel, me: ProcHandle, delta: isize) -> Result<usize> {
    let (space, sz) = {
        let table = kernel.ptable.lock();
        let p = table.record(me);
        (p.pgdir, p.sz)
    };
    let space =
        space.ok_or_else(|| KernelError::Internal(format!("pid {} has no address space", me.pid())))?;
    let target = sz
        .checked_add_signed(delta)
        .ok_or_else(|| KernelError::OutOfMemory {
            reason: format!("cannot resize {sz} bytes by {delta}"),
        })?;
    let new_sz = kernel.machine.vm.resize(space, sz, target)?;
    kernel.ptable.lock().record_mut(me).sz = new_sz;
    Ok(sz)
}

/// Open `path` into the lowest free descriptor.
pub(crate) fn open(kernel: &Kernel, me: ProcHandle, path: &str) -> Result<usize> {
    let file = kernel.machine.files.open(path)?;
    let fd = {
        let mut table = kernel.ptable.lock();
        let p = table.record_mut(me);
        let fd = p.ofile.iter().position(Option::is_none);
        if let Some(fd) = fd {
            p.ofile[fd] = Some(file);
        }
        fd
    };
    match fd {
        Some(fd) => Ok(fd),
        None => {
            kernel.machine.files.close(file);
            Err(KernelError::NoFileDescriptor {
                limit: kernel.config().nofile,
            })
        }
    }
}

pub(crate) fn close(kernel: &Kernel, me: ProcHandle, fd: usize) -> Result<()> {
    let file = {
        let mut table = kernel.ptable.lock();
        table
            .record_mut(me)
            .ofile
            .get_mut(fd)
            .and_then(Option::take)
    };
    let file = file.ok_or(KernelError::BadFileDescriptor { fd })?;
    kernel.machine.files.close(file);
    Ok(())
}
