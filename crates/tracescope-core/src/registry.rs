//! Slot registry holding all open data streams.
//!
//! Stream ids are small integers, stable for the life of the stream and
//! reused after close. The free list lives inside the slot array itself:
//! a freed slot stores the index of the next free slot.

use crate::error::{Error, Result};
use crate::stream::DataStream;

/// Number of stream slots available at initialization.
pub const DEFAULT_NUM_STREAMS: usize = 256;

/// The maximum number of streams that can be open simultaneously. The
/// limit comes from the 16 bit integer storing the stream id inside each
/// entry, minus the reserved sentinel values.
pub const MAX_STREAM_ID: i32 = i16::MAX as i32;

enum Slot {
    /// Never used.
    Vacant,

    /// Freed; holds the id of the next slot on the free list.
    Free(i32),

    /// Occupied by a live stream.
    Live(Box<DataStream>),
}

/// The stream slot array plus its free-list bookkeeping.
pub struct StreamRegistry {
    slots: Vec<Slot>,
    next_free: i32,
    max_id: i32,
    n_streams: usize,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| Slot::Vacant)
                .take(DEFAULT_NUM_STREAMS)
                .collect(),
            next_free: 0,
            max_id: -1,
            n_streams: 0,
        }
    }

    /// Add a new stream. Returns its id.
    pub fn add(&mut self) -> Result<i16> {
        if self.next_free > MAX_STREAM_ID {
            return Err(Error::Exhausted);
        }

        if self.next_free as usize == self.slots.len() {
            let new_size = (self.slots.len() * 2).min(MAX_STREAM_ID as usize + 1);
            self.slots.resize_with(new_size, || Slot::Vacant);
        }

        let new_id = if self.next_free > self.max_id {
            self.max_id += 1;
            self.next_free = self.max_id + 1;
            self.max_id
        } else {
            let id = self.next_free;
            self.next_free = match self.slots[id as usize] {
                Slot::Free(next) => next,
                _ => unreachable!("free-list head must be a freed slot"),
            };
            id
        };

        let mut stream = Box::new(DataStream::new());
        stream.stream_id = new_id as i16;
        self.slots[new_id as usize] = Slot::Live(stream);
        self.n_streams += 1;

        Ok(new_id as i16)
    }

    /// Remove a stream, putting its slot on the free list.
    pub fn remove(&mut self, sd: i16) -> Result<Box<DataStream>> {
        let id = i32::from(sd);
        if id < 0 || id > self.max_id {
            return Err(Error::BadHandle(sd));
        }

        if !matches!(self.slots[id as usize], Slot::Live(_)) {
            return Err(Error::BadHandle(sd));
        }

        let old = std::mem::replace(&mut self.slots[id as usize], Slot::Free(self.next_free));
        self.next_free = id;
        self.n_streams -= 1;

        match old {
            Slot::Live(stream) => Ok(stream),
            _ => unreachable!(),
        }
    }

    /// The live stream in slot `sd`, without requiring an attached
    /// interface. Use during stream setup.
    pub fn slot(&self, sd: i16) -> Option<&DataStream> {
        match self.slots.get(usize::try_from(sd).ok()?) {
            Some(Slot::Live(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Mutable access to the live stream in slot `sd`.
    pub fn slot_mut(&mut self, sd: i16) -> Option<&mut DataStream> {
        match self.slots.get_mut(usize::try_from(sd).ok()?) {
            Some(Slot::Live(stream)) => Some(stream),
            _ => None,
        }
    }

    /// The stream with id `sd`, if it is live and claimed by a readout.
    pub fn get(&self, sd: i16) -> Option<&DataStream> {
        self.slot(sd).filter(|s| s.interface.is_some())
    }

    /// Mutable access to the stream with id `sd`, if live and claimed.
    pub fn get_mut(&mut self, sd: i16) -> Option<&mut DataStream> {
        self.slot_mut(sd).filter(|s| s.interface.is_some())
    }

    /// Ids of all live streams, ascending.
    pub fn all_streams(&self) -> Vec<i16> {
        let mut ids = Vec::with_capacity(self.n_streams);
        for (i, slot) in self.slots.iter().enumerate() {
            if matches!(slot, Slot::Live(_)) {
                ids.push(i as i16);
            }
        }

        ids
    }

    /// The number of live streams.
    pub fn n_streams(&self) -> usize {
        self.n_streams
    }

    /// The id of the next slot the free list would hand out.
    pub fn next_free(&self) -> i32 {
        self.next_free
    }

    /// The highest stream id ever assigned, or -1.
    pub fn max_id(&self) -> i32 {
        self.max_id
    }

    /// Current slot-array capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop all slots and restart id assignment from zero. The slot array
    /// keeps its capacity.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Vacant;
        }
        self.next_free = 0;
        self.max_id = -1;
        self.n_streams = 0;
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
