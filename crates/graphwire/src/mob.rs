use graphwire_heap::Address;
use graphwire_schema::{TypeId, TYPE_ID_TERMINATOR};

/// A marshal object: the unit of serialization identity.
///
/// Identity is the `(addr, type_id)` pair; the NULL address matches any
/// type, so every pointer to nothing resolves to the single reserved NULL
/// entry at object-set index 0. The disambiguator records a dynamic
/// object's element count or active union arm — the one byte that must be
/// known before the object's extent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mob {
    pub addr: Address,
    pub type_id: TypeId,
    pub disambiguator: u8,
}

impl Mob {
    /// The reserved NULL object, permanently at object-set index 0.
    /// Its type id is the terminator value, which no client type can use.
    pub const NULL: Mob = Mob {
        addr: Address::NULL,
        type_id: TYPE_ID_TERMINATOR,
        disambiguator: 0,
    };

    pub fn new(addr: Address, type_id: TypeId, disambiguator: u8) -> Self {
        Self {
            addr,
            type_id,
            disambiguator,
        }
    }

    /// Identity match: same address and type, or a NULL address (which
    /// matches regardless of the statically expected type).
    pub fn same_identity(&self, other: &Mob) -> bool {
        self.addr == other.addr && (self.type_id == other.type_id || other.addr.is_null())
    }
}
