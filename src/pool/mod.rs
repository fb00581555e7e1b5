//! Reusable byte buffers for body and attachment ingestion.
//!
//! Reading a stream of unknown length needs a growable scratch buffer. The
//! pool hands those out and takes them back once the bytes have been copied
//! into message-owned storage, so repeated message construction does not
//! keep reallocating.

use std::io::{self, Read};
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use once_cell::sync::OnceCell;

static GLOBAL: OnceCell<BufferPool> = OnceCell::new();

/// Unbounded cache of empty byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide pool, initializing it on first use.
    pub fn global() -> &'static BufferPool {
        GLOBAL.get_or_init(BufferPool::new)
    }

    /// Takes an empty buffer from the pool, allocating one if none is cached.
    ///
    /// The buffer goes back to this pool when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self.lock().pop().unwrap_or_default();
        debug_assert!(buf.is_empty());
        PooledBuffer { pool: self, buf }
    }

    /// Clears `buf` and caches it for reuse.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.lock().push(buf);
    }

    /// Number of buffers currently cached.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    /// Reads `reader` to the end through a pooled buffer and returns an owned
    /// copy of exactly the bytes read.
    pub fn read_to_vec<R: Read>(&self, mut reader: R) -> io::Result<Vec<u8>> {
        let mut buf = self.acquire();
        reader.read_to_end(&mut buf)?;
        Ok(buf.to_vec())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Buffer checked out of a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl PooledBuffer<'_> {
    /// Detaches the buffer from the pool.
    pub fn into_inner(mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.buf);
        std::mem::forget(self);
        buf
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
