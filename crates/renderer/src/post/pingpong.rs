//! Two-slot alternation used by every multi-pass post stage.

/// A read/write pair. `read()` is the buffer written last; `write()` is the
/// other one. Only `swap` changes which is which.
#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            current: 0,
        }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn write(&mut self) -> &mut T {
        &mut self.slots[1 - self.current]
    }

    /// Both slots at once: `(read, write)`.
    pub fn split(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.slots;
        if self.current == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Make the buffer just written the new read side.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }

    pub fn into_read(self) -> T {
        let [a, b] = self.slots;
        if self.current == 0 {
            a
        } else {
            b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_alternates_read_and_write() {
        let mut pp = PingPong::new(1, 2);
        assert_eq!(*pp.read(), 1);
        *pp.write() = 3;
        pp.swap();
        assert_eq!(*pp.read(), 3);
        let (read, write) = pp.split();
        assert_eq!(*read, 3);
        *write = 4;
        pp.swap();
        assert_eq!(pp.into_read(), 4);
    }
}
