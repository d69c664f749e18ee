use std::cell::RefCell;
use std::io::{Cursor, Read, Result, Seek, SeekFrom, Write};
use std::rc::Rc;

use proptest::strategy::Strategy;

/// Returns a proptest strategy that minimizes to maximum read size
pub fn read_size_strategy() -> impl Strategy<Value = usize> {
    const MIN: usize = 1;
    const MAX: usize = 8192;
    (MIN..=MAX).prop_map(|v| MAX + MIN - v)
}

/// An in-memory stream that can be handed to an archive by value while the
/// test keeps a second handle to the same bytes.
#[derive(Clone, Debug, Default)]
pub struct SharedStream(Rc<RefCell<Cursor<Vec<u8>>>>);

impl SharedStream {
    pub fn new() -> Self {
        SharedStream::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().get_ref().clone()
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        self.0.borrow_mut().get_mut().extend_from_slice(bytes);
    }
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.0.borrow_mut().read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.0.borrow_mut().flush()
    }
}

impl Seek for SharedStream {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.0.borrow_mut().seek(pos)
    }
}
