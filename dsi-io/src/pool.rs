use std::sync::{Condvar, Mutex};

use crate::buffer::Buffer;

/// Names a buffer that has left the pool (handed to the frame) without
/// keeping the pool borrowed. A frame completion presents the handle back
/// to `release_free`/`release_ready`; if the slot has since been recycled
/// under a new generation the call is a stale, ignorable callback rather
/// than a dangling reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: usize,
    generation: u64,
}

enum Occupant {
    Free(Buffer),
    Ready { buf: Buffer, transfer_offset: u64, consumed: usize },
    /// Taken out of the pool and handed to a collaborator; the slot is a
    /// placeholder until it comes back via `release_free`/`release_ready`.
    InFlight,
}

struct Slot {
    occupant: Occupant,
    generation: u64,
}

struct State {
    slots: Vec<Slot>,
    free_idx: Vec<usize>,
    ready_idx: Vec<usize>,
    optimal_concurrency: usize,
    refresh_counter: u64,
}

impl State {
    fn all_count(&self) -> usize {
        self.slots.len()
    }

    fn in_flight_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.occupant, Occupant::InFlight))
            .count()
    }
}

/// Bounded set of fixed-size buffers shared between an engine's mover and
/// the frame's I/O completion threads. All mutation happens under one
/// mutex; the mutex is never held across a call into the frame or the
/// archive (callers must drop any pool-derived borrow before making such
/// a call — the API below hands out owned `Buffer` values precisely so
/// that dropping the lock is enforced by the type system).
pub struct BufferPool {
    state: Mutex<State>,
    cond: Condvar,
    block_size: usize,
}

impl BufferPool {
    pub fn new(block_size: usize, initial_optimal_concurrency: usize) -> Self {
        BufferPool {
            state: Mutex::new(State {
                slots: Vec::new(),
                free_idx: Vec::new(),
                ready_idx: Vec::new(),
                optimal_concurrency: initial_optimal_concurrency.max(1),
                refresh_counter: 0,
            }),
            cond: Condvar::new(),
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pop a free buffer, or allocate a new one if the pool has not yet
    /// reached `optimal_concurrency`, blocking on the pool's condvar
    /// otherwise. `refresh` is called to obtain an updated optimal
    /// concurrency exactly on the first call and every hundredth call
    /// thereafter (`refresh_counter` wraps to zero), matching the
    /// source's `ConnChkCnt++ == 0` cadence.
    pub fn get_or_alloc_free_buffer(
        &self,
        refresh: impl Fn() -> usize,
    ) -> (BufferHandle, Buffer) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.refresh_counter % 100 == 0 {
                state.optimal_concurrency = refresh().max(1);
            }
            state.refresh_counter = state.refresh_counter.wrapping_add(1);

            if let Some(id) = state.free_idx.pop() {
                let generation = state.slots[id].generation;
                let occupant = std::mem::replace(&mut state.slots[id].occupant, Occupant::InFlight);
                let buf = match occupant {
                    Occupant::Free(buf) => buf,
                    _ => unreachable!("free_idx entry was not Free"),
                };
                return (BufferHandle { id, generation }, buf);
            }

            if state.all_count() < state.optimal_concurrency {
                let id = state.slots.len();
                state.slots.push(Slot {
                    occupant: Occupant::InFlight,
                    generation: 0,
                });
                return (BufferHandle { id, generation: 0 }, Buffer::with_capacity(self.block_size));
            }

            state = self.cond.wait(state).unwrap();
        }
    }

    /// Frame write-completion (RETR/CKSM): the buffer is empty again.
    pub fn release_free(&self, handle: BufferHandle, buf: Buffer) {
        let mut state = self.state.lock().unwrap();
        if !self.slot_is_current(&state, handle) {
            return;
        }
        let id = handle.id;
        state.slots[id].occupant = Occupant::Free(buf);
        state.slots[id].generation = state.slots[id].generation.wrapping_add(1);
        state.free_idx.push(id);
        self.cond.notify_all();
    }

    /// Frame read-completion (STOR): the buffer now holds unconsumed
    /// payload tagged with its transfer offset.
    pub fn release_ready(&self, handle: BufferHandle, mut buf: Buffer, transfer_offset: u64) {
        let mut state = self.state.lock().unwrap();
        if !self.slot_is_current(&state, handle) {
            return;
        }
        buf.transfer_offset = transfer_offset;
        let id = handle.id;
        state.slots[id].occupant = Occupant::Ready {
            buf,
            transfer_offset,
            consumed: 0,
        };
        state.ready_idx.push(id);
        self.cond.notify_all();
    }

    fn slot_is_current(&self, state: &State, handle: BufferHandle) -> bool {
        state
            .slots
            .get(handle.id)
            .map(|s| s.generation == handle.generation)
            .unwrap_or(false)
    }

    /// Copy up to `dst.len()` contiguous bytes starting at `needed_offset`
    /// out of whatever ready buffers currently satisfy it, stitching
    /// together adjacent ready buffers in one pass and recycling any
    /// buffer emptied in the process. Returns the number of bytes copied.
    pub fn copy_ready_into(&self, needed_offset: u64, dst: &mut [u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut total = 0usize;

        while total < dst.len() {
            let target = needed_offset + total as u64;
            let pos = state.ready_idx.iter().position(|&id| {
                match &state.slots[id].occupant {
                    Occupant::Ready { transfer_offset, consumed, .. } => {
                        transfer_offset + *consumed as u64 == target
                    }
                    _ => false,
                }
            });
            let Some(pos) = pos else { break };
            let id = state.ready_idx[pos];

            let (take, emptied) = match &mut state.slots[id].occupant {
                Occupant::Ready { buf, consumed, .. } => {
                    let avail = buf.valid_length - *consumed;
                    let want = dst.len() - total;
                    let take = avail.min(want);
                    dst[total..total + take]
                        .copy_from_slice(&buf.as_slice()[*consumed..*consumed + take]);
                    *consumed += take;
                    (take, *consumed == buf.valid_length)
                }
                _ => unreachable!("ready_idx entry was not Ready"),
            };
            total += take;

            if emptied {
                state.ready_idx.remove(pos);
                let occupant = std::mem::replace(&mut state.slots[id].occupant, Occupant::InFlight);
                let buf = match occupant {
                    Occupant::Ready { buf, .. } => buf,
                    _ => unreachable!(),
                };
                state.slots[id].occupant = Occupant::Free(buf);
                state.slots[id].generation = state.slots[id].generation.wrapping_add(1);
                state.free_idx.push(id);
                self.cond.notify_all();
            } else {
                // Buffer still holds bytes past `dst`; nothing more is
                // satisfiable in this call since the next needed byte
                // isn't present yet.
                break;
            }
        }

        total
    }

    /// Park until another thread changes pool state (a release or a new
    /// allocation). Like the source's bare `cond_wait`, this does not
    /// itself re-check any predicate; callers loop and re-evaluate.
    pub fn wait_for_signal(&self) {
        let state = self.state.lock().unwrap();
        let _ = self.cond.wait(state).unwrap();
    }

    /// Block until every buffer the pool has ever allocated is back on
    /// the free list, or `result_latched` reports the engine has already
    /// given up — the drain performed after the engine tells the frame
    /// the transfer is finished.
    pub fn wait_until_drained(&self, result_latched: impl Fn() -> bool) {
        let mut state = self.state.lock().unwrap();
        while state.free_idx.len() != state.all_count() && !result_latched() {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn all_count(&self) -> usize {
        self.state.lock().unwrap().all_count()
    }

    pub fn current_concurrency(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready_idx.len() + state.in_flight_count()
    }

    /// Last-refreshed optimal concurrency, without triggering a refresh.
    pub fn optimal_concurrency(&self) -> usize {
        self.state.lock().unwrap().optimal_concurrency
    }

    /// Non-blocking counterpart of `get_or_alloc_free_buffer`: a launcher
    /// topping up concurrency wants to stop and wait on pool state instead
    /// of parking here once the cap is reached.
    pub fn try_get_or_alloc_free_buffer(
        &self,
        refresh: impl Fn() -> usize,
    ) -> Option<(BufferHandle, Buffer)> {
        let mut state = self.state.lock().unwrap();
        if state.refresh_counter % 100 == 0 {
            state.optimal_concurrency = refresh().max(1);
        }
        state.refresh_counter = state.refresh_counter.wrapping_add(1);

        if let Some(id) = state.free_idx.pop() {
            let generation = state.slots[id].generation;
            let occupant = std::mem::replace(&mut state.slots[id].occupant, Occupant::InFlight);
            let buf = match occupant {
                Occupant::Free(buf) => buf,
                _ => unreachable!("free_idx entry was not Free"),
            };
            return Some((BufferHandle { id, generation }, buf));
        }

        if state.all_count() < state.optimal_concurrency {
            let id = state.slots.len();
            state.slots.push(Slot {
                occupant: Occupant::InFlight,
                generation: 0,
            });
            return Some((BufferHandle { id, generation: 0 }, Buffer::with_capacity(self.block_size)));
        }

        None
    }
}
