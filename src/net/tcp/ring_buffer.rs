/// Fixed capacity byte ring buffer.
///
/// One of these holds the outbound bytes of a connection and another the
/// inbound bytes waiting for the application. Writes never wrap over unread
/// data: `put` stores only what fits. Reads may peek (`consume == false`) so
/// the send path can stage bytes that stay buffered until they are
/// acknowledged, then `advance` past them.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_at: usize,
    length: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            read_at: 0,
            length: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_full(&self) -> bool {
        self.length == self.capacity()
    }

    /// Number of bytes that can still be stored.
    pub fn free(&self) -> usize {
        self.capacity() - self.length
    }

    /// Appends as many bytes of `data` as fit and returns that count.
    pub fn put(&mut self, data: &[u8]) -> usize {
        let size = data.len().min(self.free());
        if size == 0 {
            return 0;
        }

        let write_at = (self.read_at + self.length) % self.storage.len();
        let first = size.min(self.storage.len() - write_at);
        self.storage[write_at..write_at + first].copy_from_slice(&data[..first]);
        self.storage[..size - first].copy_from_slice(&data[first..size]);

        self.length += size;
        size
    }

    /// Copies up to `buf.len()` bytes from the front of the buffer.
    ///
    /// With `consume == false` the bytes stay in the buffer.
    pub fn get(&mut self, buf: &mut [u8], consume: bool) -> usize {
        let size = buf.len().min(self.length);
        if size == 0 {
            return 0;
        }

        let first = size.min(self.storage.len() - self.read_at);
        buf[..first].copy_from_slice(&self.storage[self.read_at..self.read_at + first]);
        buf[first..size].copy_from_slice(&self.storage[..size - first]);

        if consume {
            self.advance(size);
        }
        size
    }

    /// Drops up to `size` bytes from the front and returns how many were dropped.
    pub fn advance(&mut self, size: usize) -> usize {
        let size = size.min(self.length);
        if size == 0 {
            return 0;
        }

        self.read_at = (self.read_at + size) % self.storage.len();
        self.length -= size;
        if self.length == 0 {
            self.read_at = 0;
        }
        size
    }
}
