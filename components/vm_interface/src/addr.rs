//! Opaque addresses for inspected values.
//!
//! A live value either sits in VM memory (valid only while the pinned
//! context stays paused) or in a byte buffer the debugger copied out of a
//! transient return value. Both are identified by an [`Addr`] so they can
//! share one cache keyed by (type, constness, address).

/// Identifier of a debugger-owned byte buffer.
///
/// Buffer ids are allocated by the cache that owns the bytes and are only
/// meaningful within that cache's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Address of an inspected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    /// No address; a null pointer or an uninitialized slot.
    Null,
    /// A location in the VM's own memory.
    Vm(u64),
    /// A location inside a debugger-owned buffer.
    Buffer {
        /// The owning buffer.
        id: BufferId,
        /// Byte offset within the buffer.
        offset: u64,
    },
}

impl Addr {
    /// Wrap a raw VM address, folding the VM's null pointer into
    /// [`Addr::Null`].
    pub fn vm(raw: u64) -> Addr {
        if raw == 0 {
            Addr::Null
        } else {
            Addr::Vm(raw)
        }
    }

    /// True for [`Addr::Null`].
    pub fn is_null(self) -> bool {
        matches!(self, Addr::Null)
    }

    /// Address `delta` bytes further along. Null stays null.
    pub fn offset(self, delta: u64) -> Addr {
        match self {
            Addr::Null => Addr::Null,
            Addr::Vm(a) => Addr::Vm(a + delta),
            Addr::Buffer { id, offset } => Addr::Buffer {
                id,
                offset: offset + delta,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_vm_folds_null() {
        assert_eq!(Addr::vm(0), Addr::Null);
        assert_eq!(Addr::vm(0x1000), Addr::Vm(0x1000));
    }

    #[test]
    fn test_addr_offset() {
        assert_eq!(Addr::Null.offset(8), Addr::Null);
        assert_eq!(Addr::Vm(0x10).offset(8), Addr::Vm(0x18));
        let b = Addr::Buffer {
            id: BufferId(1),
            offset: 4,
        };
        assert_eq!(
            b.offset(4),
            Addr::Buffer {
                id: BufferId(1),
                offset: 8
            }
        );
    }
}
