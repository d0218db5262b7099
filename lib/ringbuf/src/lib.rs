// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A static ring buffer for instrumenting cyclic, no-allocator contexts.
//!
//! This is the diagnostic recorder used throughout `master-core`: every
//! phase-step transition, topology edge, and wire-fault classification is
//! pushed into a per-module `Trace` ring buffer instead of going through a
//! logging facade, since the crate runs with no allocator and is frequently
//! driven from a cyclic/ISR-adjacent context where blocking I/O is not an
//! option.
//!
//! ## Creating a ring buffer
//!
//! ```
//! ringbuf::ringbuf!(u32, 16, 0);
//! ```
//!
//! ```
//! ringbuf::ringbuf!(MY_RINGBUF, u32, 16, 0);
//! ringbuf::ringbuf_entry!(MY_RINGBUF, 42);
//! ```

#![no_std]

pub use static_cell::StaticCell;

/// Declares a ring buffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ring buffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all
/// initialized to `expr`. If `NAME` is omitted it defaults to `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, $n>> =
            $crate::StaticCell::new($crate::Ringbuf::new($init));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts data into a named ring buffer (declared with [`ringbuf!`]).
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let (p, buf) = ($payload, &$buf);
        if let Some(mut ring) = buf.try_borrow_mut() {
            ring.record(line!() as u16, p);
        }
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// A single ring buffer entry.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy> {
    pub line: u16,
    pub generation: u16,
    pub count: u16,
    pub payload: T,
}

/// A ring buffer of parametrized entry type and fixed capacity `N`.
///
/// Instantiate this through the [`ringbuf!`] macro rather than directly.
#[derive(Debug)]
pub struct Ringbuf<T: Copy, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entries(&self) -> &[RingbufEntry<T>] {
        &self.buffer
    }

    pub fn last_index(&self) -> Option<usize> {
        self.last
    }

    pub fn record(&mut self, line: u16, payload: T)
    where
        T: PartialEq,
    {
        let last = self.last.unwrap_or(usize::MAX);
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let next = last.wrapping_add(1);
            if next >= self.buffer.len() {
                0
            } else {
                next
            }
        };
        let generation = self.buffer[ndx].generation.wrapping_add(1);
        self.buffer[ndx] = RingbufEntry {
            line,
            payload,
            count: 1,
            generation,
        };
        self.last = Some(ndx);
    }
}

#[cfg(test)]
mod tests {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Ev {
        None,
        Tick(u8),
    }

    ringbuf!(Ev, 4, Ev::None);

    #[test]
    fn wraps_and_dedups() {
        ringbuf_entry!(Ev::Tick(1));
        ringbuf_entry!(Ev::Tick(1));
        ringbuf_entry!(Ev::Tick(2));
        ringbuf_entry!(Ev::Tick(3));
        ringbuf_entry!(Ev::Tick(4));
        ringbuf_entry!(Ev::Tick(5));

        let ring = __RINGBUF.borrow_mut();
        let last = ring.last_index().unwrap();
        assert_eq!(ring.entries()[last].payload, Ev::Tick(5));
    }
}
